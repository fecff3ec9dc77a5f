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

use bucketfs_error::{Error, error_if, make_input_err};

// ----- Upload size thresholds -----
/// Minimum alignment unit for resumable upload chunks (256 KiB). The
/// remote protocol requires every chunk except the final one to be a
/// multiple of this.
pub const CHUNK_ALIGNMENT: u64 = 256 * 1024;
/// Default chunk size for resumable uploads (64 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Default content type for uploaded objects
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub name: String,
    pub bucket: String,
    pub size: u64,
    pub content_type: String,
    pub update_time: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

/// A bucket plus object key. Keys never carry a leading slash; an
/// empty key addresses the bucket root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectPath {
    pub bucket: String,
    pub path: String,
}

impl ObjectPath {
    pub fn new(bucket: String, path: &str) -> Self {
        let normalized_path = path.replace('\\', "/").trim_start_matches('/').to_string();
        Self {
            bucket,
            path: normalized_path,
        }
    }

    /// Parses a `scheme://bucket/key/with/segments` URI. The scheme is
    /// required to be present but is otherwise ignored; the authority
    /// component is the bucket and the rest of the path is the key.
    pub fn parse(uri: &str) -> Result<Self, Error> {
        let (_scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| make_input_err!("Malformed object URI '{uri}': missing scheme"))?;
        let (bucket, key) = match rest.split_once('/') {
            Some((bucket, key)) => (bucket, key),
            None => (rest, ""),
        };
        error_if!(
            bucket.is_empty(),
            "Malformed object URI '{uri}': empty bucket"
        );
        Ok(Self::new(bucket.to_string(), key))
    }

    /// True when this path addresses the bucket itself rather than an
    /// object in it.
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The key with a trailing delimiter, for prefix-listing the
    /// emulated directory at this path.
    pub fn path_with_delimiter(&self) -> String {
        if self.path.ends_with('/') {
            self.path.clone()
        } else {
            format!("{}/", self.path)
        }
    }
}

impl core::fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}
