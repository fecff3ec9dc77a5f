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

use core::time::Duration;
use std::path::Path;
use std::sync::Arc;

use bucketfs_config::stores::ObjectFsSpec;
use bucketfs_error::{Code, Error, ResultExt, make_err};
use bucketfs_util::observe::{DiagnosticSink, ProgressObserver};
use bucketfs_util::retry::{Retrier, RetryResult};
use bytes::Bytes;
use futures::stream::unfold;
use rand::Rng;
use tokio::time::sleep;

use crate::client::operations::ObjectStoreOperations;
use crate::client::types::{DEFAULT_CHUNK_SIZE, ObjectMetadata, ObjectPath};
use crate::handles::{AtomicWriter, ObjectReader};
use crate::upload::Uploader;

/// Filesystem-like view over a remote object store. Paths are
/// `scheme://bucket/key` URIs; directories are emulated by key
/// prefixes and only exist while at least one object sits under them.
///
/// Instances are cheap to share and safe for concurrent use; every
/// upload drives its own session with no state shared across calls.
#[derive(Debug)]
pub struct ObjectFileSystem {
    ops: Arc<dyn ObjectStoreOperations>,
    spec: ObjectFsSpec,
    retrier: Retrier,
    diagnostics: Arc<dyn DiagnosticSink>,
    uploader: Uploader,
}

impl ObjectFileSystem {
    pub fn new(
        ops: Arc<dyn ObjectStoreOperations>,
        spec: ObjectFsSpec,
        diagnostics: Arc<dyn DiagnosticSink>,
        progress: Arc<dyn ProgressObserver>,
    ) -> Arc<Self> {
        let jitter_amt = spec.retry.jitter;
        let jitter_fn = Arc::new(move |delay: Duration| {
            if jitter_amt == 0.0 {
                return delay;
            }
            let min = 1.0 - (jitter_amt / 2.0);
            let max = 1.0 + (jitter_amt / 2.0);
            let mut rng = rand::rng();
            let factor = min + (max - min) * rng.random::<f32>();
            delay.mul_f32(factor)
        });
        let retrier = Retrier::new(
            Arc::new(|duration| Box::pin(sleep(duration))),
            jitter_fn,
            spec.retry.clone(),
        );
        let uploader = Uploader::new(
            ops.clone(),
            retrier.clone(),
            diagnostics.clone(),
            progress,
        );

        Arc::new(Self {
            ops,
            spec,
            retrier,
            diagnostics,
            uploader,
        })
    }

    /// True when an object exists at `uri`, or a directory is emulated
    /// there by at least one object under `key/`. Absence is a plain
    /// `false`, never an error.
    pub async fn exists(&self, uri: &str) -> Result<bool, Error> {
        let object = ObjectPath::parse(uri)?;
        if self.get_metadata(&object).await?.is_some() {
            return Ok(true);
        }
        self.is_dir_object(&object).await
    }

    pub async fn is_dir(&self, uri: &str) -> Result<bool, Error> {
        let object = ObjectPath::parse(uri)?;
        self.is_dir_object(&object).await
    }

    /// Directories are emulated through key prefixes, so there is
    /// nothing to create. Succeeds after validating the path.
    pub async fn mkdir(&self, uri: &str) -> Result<(), Error> {
        ObjectPath::parse(uri).map(|_| ())
    }

    /// Remove the object at `uri`, or (with `recursive_delete` set)
    /// everything under the directory prefix at `uri`. Returns `false`
    /// when there was nothing to remove. Removing the bucket root, or
    /// a non-empty directory without the recursive flag, is rejected
    /// as caller misuse.
    pub async fn remove(&self, uri: &str) -> Result<bool, Error> {
        let object = ObjectPath::parse(uri)?;
        if object.is_root() {
            return Err(make_err!(
                Code::FailedPrecondition,
                "Refusing to remove the root of bucket {}",
                object.bucket
            ));
        }

        if self.get_metadata(&object).await?.is_some() {
            self.delete_one(&object).await?;
            self.diagnostics.debug(&format!("Removed {object}"));
            return Ok(true);
        }

        let items = self
            .list_prefix(&object.bucket, &object.path_with_delimiter())
            .await?;
        if items.is_empty() {
            return Ok(false);
        }
        if !self.spec.recursive_delete {
            return Err(make_err!(
                Code::FailedPrecondition,
                "Refusing to remove non-empty directory {object} without the recursive flag"
            ));
        }
        for item in items {
            self.delete_one(&ObjectPath::new(object.bucket.clone(), &item.name))
                .await?;
        }
        self.diagnostics
            .debug(&format!("Recursively removed {object}"));
        Ok(true)
    }

    /// Single-shot upload of a local file.
    pub async fn put(&self, local_path: &Path, dest_uri: &str) -> Result<ObjectPath, Error> {
        let object = ObjectPath::parse(dest_uri)?;
        self.uploader.put_whole(local_path, &object).await
    }

    /// Upload a local file, using a resumable chunked session when the
    /// file is large enough to warrant one. `chunk_size` falls back to
    /// the configured value, then to the 64 MiB default.
    pub async fn put_multipart(
        &self,
        local_path: &Path,
        dest_uri: &str,
        chunk_size: Option<u64>,
    ) -> Result<ObjectPath, Error> {
        let object = ObjectPath::parse(dest_uri)?;
        self.uploader
            .upload_file(local_path, &object, self.effective_chunk_size(chunk_size))
            .await
    }

    /// Open the object at `uri` for line-oriented reading. The content
    /// is fetched in one call here; iteration over it is lazy.
    pub async fn open_read(&self, uri: &str) -> Result<ObjectReader, Error> {
        let object = ObjectPath::parse(uri)?;
        let content = self
            .retrier
            .retry(unfold(object, move |object| async move {
                match self.ops.read_object_content(&object).await {
                    Ok(data) => Some((RetryResult::Ok(data), object)),
                    Err(e) if e.code == Code::NotFound => Some((RetryResult::Err(e), object)),
                    Err(e) => Some((RetryResult::Retry(e), object)),
                }
            }))
            .await
            .err_tip(|| format!("Could not read object at {uri}"))?;
        Ok(ObjectReader::new(Bytes::from(content)))
    }

    /// Open a write handle for `uri`. Writes land in a local staging
    /// file; nothing touches the remote object until `commit`.
    pub fn open_write(self: &Arc<Self>, uri: &str) -> Result<AtomicWriter, Error> {
        let object = ObjectPath::parse(uri)?;
        AtomicWriter::new(self.clone(), object)
    }

    pub(crate) async fn commit_staged(
        &self,
        staged: &Path,
        dest: &ObjectPath,
    ) -> Result<ObjectPath, Error> {
        self.uploader
            .upload_file(staged, dest, self.effective_chunk_size(None))
            .await
    }

    fn effective_chunk_size(&self, requested: Option<u64>) -> u64 {
        requested
            .or(self.spec.resumable_chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    async fn is_dir_object(&self, object: &ObjectPath) -> Result<bool, Error> {
        // The bucket root always exists as a directory.
        if object.is_root() {
            return Ok(true);
        }
        let items = self
            .list_prefix(&object.bucket, &object.path_with_delimiter())
            .await?;
        Ok(!items.is_empty())
    }

    async fn get_metadata(&self, object: &ObjectPath) -> Result<Option<ObjectMetadata>, Error> {
        self.retrier
            .retry(unfold(object.clone(), move |object| async move {
                match self.ops.read_object_metadata(&object).await {
                    Ok(metadata) => Some((RetryResult::Ok(metadata), object)),
                    Err(e) if e.code == Code::NotFound => Some((RetryResult::Ok(None), object)),
                    Err(e) => Some((RetryResult::Retry(e), object)),
                }
            }))
            .await
    }

    async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMetadata>, Error> {
        self.retrier
            .retry(unfold(
                (bucket.to_string(), prefix.to_string()),
                move |(bucket, prefix)| async move {
                    match self.ops.list_objects_with_prefix(&bucket, &prefix).await {
                        Ok(items) => Some((RetryResult::Ok(items), (bucket, prefix))),
                        Err(e) => Some((RetryResult::Retry(e), (bucket, prefix))),
                    }
                },
            ))
            .await
    }

    async fn delete_one(&self, object: &ObjectPath) -> Result<bool, Error> {
        self.retrier
            .retry(unfold(object.clone(), move |object| async move {
                match self.ops.delete_object(&object).await {
                    Ok(existed) => Some((RetryResult::Ok(existed), object)),
                    Err(e) if e.code == Code::NotFound => Some((RetryResult::Ok(false), object)),
                    Err(e) => Some((RetryResult::Retry(e), object)),
                }
            }))
            .await
    }
}
