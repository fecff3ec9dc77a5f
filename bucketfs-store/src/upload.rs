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

use std::path::Path;
use std::sync::Arc;

use bucketfs_error::{Code, Error, ResultExt, make_err};
use bucketfs_util::observe::{DiagnosticSink, ProgressObserver};
use bucketfs_util::retry::{Retrier, RetryResult};
use bytes::Bytes;
use futures::stream::unfold;
use tokio::io::AsyncReadExt;

use crate::client::operations::ObjectStoreOperations;
use crate::client::types::{CHUNK_ALIGNMENT, ObjectPath};

/// Returns a chunk size that is a positive multiple of the 256 KiB
/// alignment unit. Already-aligned sizes pass through unchanged;
/// everything else is rounded up, never down, so the caller's intended
/// durability granularity is preserved. Correction is a warning-level
/// observation, not an error.
pub fn normalize_chunk_size(requested: u64, diagnostics: &dyn DiagnosticSink) -> u64 {
    if requested != 0 && requested % CHUNK_ALIGNMENT == 0 {
        return requested;
    }
    // Near u64::MAX the next multiple is not representable; clamp to
    // the largest one instead of overflowing.
    let corrected = (requested / CHUNK_ALIGNMENT + 1)
        .checked_mul(CHUNK_ALIGNMENT)
        .unwrap_or(u64::MAX - (u64::MAX % CHUNK_ALIGNMENT));
    diagnostics.warn(&format!(
        "Chunk size must be a multiple of 256 KiB, rounding {requested} up to {corrected}"
    ));
    corrected
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Whole file in one insert request. A failed request carries no
    /// server-side state to reconcile and can simply be reissued.
    SingleShot,
    /// Chunked upload against a stateful resumable session.
    Resumable { chunk_size: u64 },
}

/// Decides between a single whole-body insert and a resumable session.
/// Small payloads (at most one chunk, or below the alignment unit)
/// are not worth the session overhead.
pub fn select_upload_strategy(
    file_size: u64,
    requested_chunk_size: u64,
    diagnostics: &dyn DiagnosticSink,
) -> UploadStrategy {
    if file_size <= requested_chunk_size || file_size < CHUNK_ALIGNMENT {
        return UploadStrategy::SingleShot;
    }
    UploadStrategy::Resumable {
        chunk_size: normalize_chunk_size(requested_chunk_size, diagnostics),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

/// One upload of one local file to one remote object. Owned by the
/// call that created it and discarded on a terminal state; there is no
/// cross-session resume.
#[derive(Debug)]
pub struct UploadSession {
    object: ObjectPath,
    total_size: u64,
    chunk_size: u64,
    bytes_sent: u64,
    upload_id: String,
    state: SessionState,
}

impl UploadSession {
    /// A fresh session against an already started remote resumable
    /// write, in `Initiated` state with nothing sent.
    pub const fn new(
        object: ObjectPath,
        total_size: u64,
        chunk_size: u64,
        upload_id: String,
    ) -> Self {
        Self {
            object,
            total_size,
            chunk_size,
            bytes_sent: 0,
            upload_id,
            state: SessionState::Initiated,
        }
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

/// Drives uploads of local files to remote objects: picks the upload
/// strategy, owns the resumable session lifecycle and wraps every
/// remote call in transient-error retry.
#[derive(Debug, Clone)]
pub struct Uploader {
    ops: Arc<dyn ObjectStoreOperations>,
    retrier: Retrier,
    diagnostics: Arc<dyn DiagnosticSink>,
    progress: Arc<dyn ProgressObserver>,
}

impl Uploader {
    pub fn new(
        ops: Arc<dyn ObjectStoreOperations>,
        retrier: Retrier,
        diagnostics: Arc<dyn DiagnosticSink>,
        progress: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            ops,
            retrier,
            diagnostics,
            progress,
        }
    }

    /// Upload `local_path` to `dest`, choosing single-shot or resumable
    /// per `select_upload_strategy`. Returns the committed locator.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        dest: &ObjectPath,
        requested_chunk_size: u64,
    ) -> Result<ObjectPath, Error> {
        let total_size = tokio::fs::metadata(local_path)
            .await
            .err_tip(|| format!("Failed to stat {}", local_path.display()))?
            .len();

        match select_upload_strategy(total_size, requested_chunk_size, &*self.diagnostics) {
            UploadStrategy::SingleShot => {
                self.diagnostics
                    .debug("File small enough to upload as a single request");
                self.put_whole(local_path, dest).await
            }
            UploadStrategy::Resumable { chunk_size } => {
                self.run_session(local_path, dest, total_size, chunk_size)
                    .await
            }
        }
    }

    /// Whole-body insert of a local file, retried on transient errors.
    pub async fn put_whole(
        &self,
        local_path: &Path,
        dest: &ObjectPath,
    ) -> Result<ObjectPath, Error> {
        let content = Bytes::from(
            tokio::fs::read(local_path)
                .await
                .err_tip(|| format!("Failed to read {}", local_path.display()))?,
        );

        self.retrier
            .retry(unfold(
                (content, dest.clone()),
                move |(content, object)| async move {
                    match self.ops.write_object(&object, content.clone()).await {
                        Ok(()) => Some((RetryResult::Ok(()), (content, object))),
                        Err(e) => Some((RetryResult::Retry(e), (content, object))),
                    }
                },
            ))
            .await
            .err_tip(|| format!("Failed to upload {} to {dest}", local_path.display()))?;
        Ok(dest.clone())
    }

    async fn run_session(
        &self,
        local_path: &Path,
        dest: &ObjectPath,
        total_size: u64,
        chunk_size: u64,
    ) -> Result<ObjectPath, Error> {
        // Session initiation gets the same retry treatment as chunks.
        let upload_id = self
            .retrier
            .retry(unfold(dest.clone(), move |object| async move {
                match self.ops.start_resumable_write(&object, total_size).await {
                    Ok(id) => Some((RetryResult::Ok(id), object)),
                    Err(e) => Some((RetryResult::Retry(e), object)),
                }
            }))
            .await
            .err_tip(|| format!("Failed to start resumable upload for {dest}"))?;

        let mut session = UploadSession::new(dest.clone(), total_size, chunk_size, upload_id);

        match self.send_chunks(&mut session, local_path).await {
            Ok(()) => Ok(session.object.clone()),
            Err(e) => {
                // The remote session is abandoned, not aborted; the
                // caller decides whether to start a fresh upload.
                self.diagnostics.error(&format!(
                    "Resumable upload of {} failed after {} of {} bytes",
                    session.object, session.bytes_sent, session.total_size
                ));
                Err(e)
            }
        }
    }

    /// Drive `session` to a terminal state by sending the file chunk
    /// by chunk: `Completed` with `bytes_sent == total_size` on
    /// success, `Failed` on any error.
    pub async fn send_chunks(
        &self,
        session: &mut UploadSession,
        local_path: &Path,
    ) -> Result<(), Error> {
        let result = self.send_chunks_inner(session, local_path).await;
        if result.is_err() {
            session.state = SessionState::Failed;
        }
        result
    }

    async fn send_chunks_inner(
        &self,
        session: &mut UploadSession,
        local_path: &Path,
    ) -> Result<(), Error> {
        let mut file = tokio::fs::File::open(local_path)
            .await
            .err_tip(|| format!("Failed to open {}", local_path.display()))?;
        let mut buf = vec![0u8; session.chunk_size as usize];

        while session.bytes_sent < session.total_size {
            let remaining = session.total_size - session.bytes_sent;
            let to_read = remaining.min(session.chunk_size) as usize;
            file.read_exact(&mut buf[..to_read])
                .await
                .err_tip(|| format!("Failed reading chunk from {}", local_path.display()))?;

            let chunk = Bytes::copy_from_slice(&buf[..to_read]);
            let offset = session.bytes_sent;
            let total_size = session.total_size;
            let is_final = offset + to_read as u64 >= total_size;

            let persisted = self
                .retrier
                .retry(unfold(
                    (chunk, session.object.clone(), session.upload_id.clone()),
                    move |(chunk, object, upload_id)| async move {
                        match self
                            .ops
                            .upload_chunk(
                                &upload_id,
                                &object,
                                chunk.clone(),
                                offset,
                                total_size,
                                is_final,
                            )
                            .await
                        {
                            Ok(persisted) => {
                                Some((RetryResult::Ok(persisted), (chunk, object, upload_id)))
                            }
                            Err(e) => Some((RetryResult::Retry(e), (chunk, object, upload_id))),
                        }
                    },
                ))
                .await
                .err_tip(|| format!("Failed to upload chunk at offset {offset}"))?;

            // The server acknowledgment is the source of truth for how
            // many bytes are durable. A disagreement with the local
            // offset after a successful ack is unrecoverable.
            let expected = offset + to_read as u64;
            if persisted != expected {
                return Err(make_err!(
                    Code::DataLoss,
                    "Server acknowledged {persisted} bytes for {}, expected {expected}",
                    session.object
                ));
            }
            session.bytes_sent = persisted;
            session.state = if is_final {
                SessionState::Completed
            } else {
                SessionState::InProgress
            };
            self.progress
                .on_progress(session.bytes_sent, session.total_size);
        }

        Ok(())
    }
}
