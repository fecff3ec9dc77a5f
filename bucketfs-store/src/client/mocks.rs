// Copyright 2025 The BucketFs Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bucketfs_error::{Code, Error, make_err};
use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::client::operations::ObjectStoreOperations;
use crate::client::types::{DEFAULT_CONTENT_TYPE, ObjectMetadata, ObjectPath, Timestamp};

/// In-memory implementation of `ObjectStoreOperations` for tests.
///
/// Failures are scripted per operation: every error pushed with
/// `push_failure` is returned by one future call to that operation, in
/// push order, before the real in-memory behavior resumes. A call that
/// fails this way has no effect on stored state, which is what lets
/// retry sequences be simulated faithfully.
#[derive(Debug)]
pub struct MockStoreOperations {
    objects: RwLock<HashMap<String, MockObject>>,
    sessions: RwLock<HashMap<String, MockSession>>,
    planned_failures: Mutex<HashMap<MockOp, VecDeque<Error>>>,
    planned_acks: Mutex<VecDeque<u64>>,
    call_counts: CallCounts,
}

#[derive(Debug, Clone)]
struct MockObject {
    metadata: ObjectMetadata,
    content: Vec<u8>,
}

#[derive(Debug)]
struct MockSession {
    object: ObjectPath,
    total_size: u64,
    buffer: Vec<u8>,
    completed: bool,
}

/// Operations whose failures can be scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Metadata,
    List,
    Read,
    Write,
    StartResumable,
    UploadChunk,
    Delete,
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub metadata_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
    pub write_calls: AtomicUsize,
    pub start_resumable_calls: AtomicUsize,
    pub upload_chunk_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl Clone for CallCounts {
    fn clone(&self) -> Self {
        Self {
            metadata_calls: AtomicUsize::new(self.metadata_calls.load(Ordering::Relaxed)),
            list_calls: AtomicUsize::new(self.list_calls.load(Ordering::Relaxed)),
            read_calls: AtomicUsize::new(self.read_calls.load(Ordering::Relaxed)),
            write_calls: AtomicUsize::new(self.write_calls.load(Ordering::Relaxed)),
            start_resumable_calls: AtomicUsize::new(
                self.start_resumable_calls.load(Ordering::Relaxed),
            ),
            upload_chunk_calls: AtomicUsize::new(self.upload_chunk_calls.load(Ordering::Relaxed)),
            delete_calls: AtomicUsize::new(self.delete_calls.load(Ordering::Relaxed)),
        }
    }
}

impl MockStoreOperations {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            planned_failures: Mutex::new(HashMap::new()),
            planned_acks: Mutex::new(VecDeque::new()),
            call_counts: CallCounts::default(),
        }
    }

    /// Add an object to the store directly.
    pub async fn add_object(&self, path: &ObjectPath, content: Vec<u8>) {
        let object_key = Self::object_key(path);
        let mock_object = MockObject {
            metadata: Self::make_metadata(path, content.len() as u64),
            content,
        };
        self.objects.write().await.insert(object_key, mock_object);
    }

    /// Fetch an object's content directly, bypassing call accounting.
    pub async fn get_object(&self, path: &ObjectPath) -> Option<Vec<u8>> {
        let object_key = Self::object_key(path);
        self.objects
            .read()
            .await
            .get(&object_key)
            .map(|obj| obj.content.clone())
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Number of resumable sessions ever started.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Queue an error to be returned by one future call to `op`.
    pub async fn push_failure(&self, op: MockOp, error: Error) {
        self.planned_failures
            .lock()
            .await
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Queue `count` identical errors with the given code for `op`.
    pub async fn push_failures(&self, op: MockOp, count: usize, code: Code) {
        for _ in 0..count {
            self.push_failure(op, make_err!(code, "Simulated {op:?} failure"))
                .await;
        }
    }

    /// Queue a forged persisted-size value to be returned by one
    /// future successful `upload_chunk` call in place of the real
    /// buffered length. The forged call never commits the object.
    pub async fn push_short_ack(&self, persisted: u64) {
        self.planned_acks.lock().await.push_back(persisted);
    }

    pub fn get_call_counts(&self) -> CallCounts {
        self.call_counts.clone()
    }

    async fn take_planned_failure(&self, op: MockOp) -> Result<(), Error> {
        if let Some(queue) = self.planned_failures.lock().await.get_mut(&op) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }

    fn object_key(path: &ObjectPath) -> String {
        format!("{}/{}", path.bucket, path.path)
    }

    fn make_metadata(path: &ObjectPath, size: u64) -> ObjectMetadata {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        ObjectMetadata {
            name: path.path.clone(),
            bucket: path.bucket.clone(),
            size,
            content_type: DEFAULT_CONTENT_TYPE.into(),
            update_time: Some(Timestamp {
                seconds: now,
                nanos: 0,
            }),
        }
    }
}

#[async_trait]
impl ObjectStoreOperations for MockStoreOperations {
    async fn read_object_metadata(
        &self,
        object: &ObjectPath,
    ) -> Result<Option<ObjectMetadata>, Error> {
        self.call_counts
            .metadata_calls
            .fetch_add(1, Ordering::Relaxed);
        self.take_planned_failure(MockOp::Metadata).await?;

        let object_key = Self::object_key(object);
        let objects = self.objects.read().await;
        Ok(objects.get(&object_key).map(|obj| obj.metadata.clone()))
    }

    async fn list_objects_with_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMetadata>, Error> {
        self.call_counts.list_calls.fetch_add(1, Ordering::Relaxed);
        self.take_planned_failure(MockOp::List).await?;

        let objects = self.objects.read().await;
        let mut items: Vec<ObjectMetadata> = objects
            .values()
            .filter(|obj| obj.metadata.bucket == bucket && obj.metadata.name.starts_with(prefix))
            .map(|obj| obj.metadata.clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn read_object_content(&self, object: &ObjectPath) -> Result<Vec<u8>, Error> {
        self.call_counts.read_calls.fetch_add(1, Ordering::Relaxed);
        self.take_planned_failure(MockOp::Read).await?;

        let object_key = Self::object_key(object);
        let objects = self.objects.read().await;
        objects
            .get(&object_key)
            .map(|obj| obj.content.clone())
            .ok_or_else(|| make_err!(Code::NotFound, "Object {object} not found"))
    }

    async fn write_object(&self, object: &ObjectPath, content: Bytes) -> Result<(), Error> {
        self.call_counts.write_calls.fetch_add(1, Ordering::Relaxed);
        self.take_planned_failure(MockOp::Write).await?;

        self.add_object(object, content.to_vec()).await;
        Ok(())
    }

    async fn start_resumable_write(
        &self,
        object: &ObjectPath,
        total_size: u64,
    ) -> Result<String, Error> {
        self.call_counts
            .start_resumable_calls
            .fetch_add(1, Ordering::Relaxed);
        self.take_planned_failure(MockOp::StartResumable).await?;

        let upload_id = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(
            upload_id.clone(),
            MockSession {
                object: object.clone(),
                total_size,
                buffer: Vec::new(),
                completed: false,
            },
        );
        Ok(upload_id)
    }

    async fn upload_chunk(
        &self,
        upload_id: &str,
        object: &ObjectPath,
        data: Bytes,
        offset: u64,
        total_size: u64,
        is_final: bool,
    ) -> Result<u64, Error> {
        self.call_counts
            .upload_chunk_calls
            .fetch_add(1, Ordering::Relaxed);
        self.take_planned_failure(MockOp::UploadChunk).await?;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| make_err!(Code::NotFound, "Unknown upload session {upload_id}"))?;

        if session.completed {
            return Err(make_err!(
                Code::FailedPrecondition,
                "Upload session {upload_id} already completed"
            ));
        }
        if session.object != *object {
            return Err(make_err!(
                Code::InvalidArgument,
                "Chunk for {object} sent to session of {}",
                session.object
            ));
        }
        if offset != session.buffer.len() as u64 {
            return Err(make_err!(
                Code::InvalidArgument,
                "Out of order chunk: offset {offset}, server has {} bytes",
                session.buffer.len()
            ));
        }
        if total_size != session.total_size {
            return Err(make_err!(
                Code::InvalidArgument,
                "Total size changed mid-session: {total_size} != {}",
                session.total_size
            ));
        }

        session.buffer.extend_from_slice(&data);
        let persisted = session.buffer.len() as u64;

        if let Some(forged) = self.planned_acks.lock().await.pop_front() {
            return Ok(forged);
        }

        if is_final {
            if persisted != session.total_size {
                return Err(make_err!(
                    Code::InvalidArgument,
                    "Final chunk closes session at {persisted} bytes, expected {}",
                    session.total_size
                ));
            }
            session.completed = true;
            let content = core::mem::take(&mut session.buffer);
            let target = session.object.clone();
            drop(sessions);
            self.add_object(&target, content).await;
            return Ok(persisted);
        }

        Ok(persisted)
    }

    async fn delete_object(&self, object: &ObjectPath) -> Result<bool, Error> {
        self.call_counts
            .delete_calls
            .fetch_add(1, Ordering::Relaxed);
        self.take_planned_failure(MockOp::Delete).await?;

        let object_key = Self::object_key(object);
        Ok(self.objects.write().await.remove(&object_key).is_some())
    }
}

impl Default for MockStoreOperations {
    fn default() -> Self {
        Self::new()
    }
}
