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

use std::io::Write;
use std::sync::Arc;

use bucketfs_error::{Error, ResultExt};
use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::client::types::ObjectPath;
use crate::fs::ObjectFileSystem;

/// Read-only view over an object's full content. The bytes were
/// fetched eagerly in one call; `lines` iterates them lazily. The
/// iterator is finite and not restartable once consumed.
#[derive(Debug)]
pub struct ObjectReader {
    content: Bytes,
}

impl ObjectReader {
    pub(crate) const fn new(content: Bytes) -> Self {
        Self { content }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_bytes(self) -> Bytes {
        self.content
    }

    /// Iterate the content line by line. Line terminators (`\n` or
    /// `\r\n`) are stripped; bytes that are not valid UTF-8 are
    /// replaced.
    pub fn lines(self) -> Lines {
        Lines {
            content: self.content,
            pos: 0,
        }
    }
}

#[derive(Debug)]
pub struct Lines {
    content: Bytes,
    pos: usize,
}

impl Iterator for Lines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.pos >= self.content.len() {
            return None;
        }
        let rest = &self.content[self.pos..];
        let (line_end, next_pos) = match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => (idx, self.pos + idx + 1),
            None => (rest.len(), self.content.len()),
        };
        let mut line = &rest[..line_end];
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }
        self.pos = next_pos;
        Some(String::from_utf8_lossy(line).into_owned())
    }
}

/// Write handle with all-or-nothing visibility. Bytes go to a local
/// temp file; `commit` uploads the staged file to the destination
/// object through the upload strategy selector. Dropping the handle
/// without committing discards the staging file and leaves the remote
/// object untouched.
#[derive(Debug)]
pub struct AtomicWriter {
    fs: Arc<ObjectFileSystem>,
    dest: ObjectPath,
    staging: NamedTempFile,
}

impl AtomicWriter {
    pub(crate) fn new(fs: Arc<ObjectFileSystem>, dest: ObjectPath) -> Result<Self, Error> {
        let staging = NamedTempFile::new()
            .err_tip(|| format!("Failed to create staging file for {dest}"))?;
        Ok(Self { fs, dest, staging })
    }

    pub fn destination(&self) -> &ObjectPath {
        &self.dest
    }

    /// Flush the staging file and upload it to the destination.
    pub async fn commit(mut self) -> Result<ObjectPath, Error> {
        self.staging
            .flush()
            .err_tip(|| format!("Failed to flush staging file for {}", self.dest))?;
        // Detach the temp path so the file survives until the upload
        // finishes; it is deleted when `staged` drops.
        let staged = self.staging.into_temp_path();
        self.fs.commit_staged(&staged, &self.dest).await
    }
}

impl Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.staging.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.staging.flush()
    }
}
