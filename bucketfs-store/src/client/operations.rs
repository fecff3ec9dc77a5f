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

use core::fmt::Debug;

use async_trait::async_trait;
use bucketfs_error::Error;
use bytes::Bytes;

use crate::client::types::{ObjectMetadata, ObjectPath};

/// The boundary to the remote object store. Everything above this
/// trait is network-library agnostic; a production client implements
/// it against the store's HTTP API, and tests implement it in memory.
///
/// All operations may fail; callers classify failures by error code
/// (transient server conditions are retried, everything else is not).
#[async_trait]
pub trait ObjectStoreOperations: Send + Sync + Debug {
    /// Read metadata for an object. Absence is `None`, never an error.
    async fn read_object_metadata(
        &self,
        object: &ObjectPath,
    ) -> Result<Option<ObjectMetadata>, Error>;

    /// List the objects whose keys start with `prefix`.
    async fn list_objects_with_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMetadata>, Error>;

    /// Read the full content of an object in one call.
    async fn read_object_content(&self, object: &ObjectPath) -> Result<Vec<u8>, Error>;

    /// Write an object with a single whole-body request.
    async fn write_object(&self, object: &ObjectPath, content: Bytes) -> Result<(), Error>;

    /// Start a resumable write session and return its opaque handle.
    async fn start_resumable_write(
        &self,
        object: &ObjectPath,
        total_size: u64,
    ) -> Result<String, Error>;

    /// Send one chunk of a resumable session. Chunks are strictly
    /// sequential and offset-addressed. Returns the number of bytes
    /// the server has persisted so far.
    async fn upload_chunk(
        &self,
        upload_id: &str,
        object: &ObjectPath,
        data: Bytes,
        offset: u64,
        total_size: u64,
        is_final: bool,
    ) -> Result<u64, Error>;

    /// Delete an object. Returns `false` when it did not exist.
    async fn delete_object(&self, object: &ObjectPath) -> Result<bool, Error>;
}
