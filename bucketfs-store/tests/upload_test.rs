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

use core::sync::atomic::Ordering;
use std::io::Write;
use std::sync::{Arc, Mutex};

use bucketfs_config::stores::{ObjectFsSpec, Retry};
use bucketfs_error::{Code, Error, make_err};
use bucketfs_macro::bucketfs_test;
use bucketfs_store::client::mocks::{MockOp, MockStoreOperations};
use bucketfs_store::client::operations::ObjectStoreOperations;
use bucketfs_store::client::types::{CHUNK_ALIGNMENT, DEFAULT_CHUNK_SIZE, ObjectPath};
use bucketfs_store::fs::ObjectFileSystem;
use bucketfs_store::upload::{
    SessionState, UploadSession, UploadStrategy, Uploader, normalize_chunk_size,
    select_upload_strategy,
};
use bucketfs_util::observe::{DiagnosticSink, NullProgress, NullSink, ProgressObserver};
use bucketfs_util::retry::Retrier;
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

const BUCKET_NAME: &str = "test-bucket";

#[derive(Debug, Default)]
struct RecordingSink {
    warnings: Mutex<Vec<String>>,
}

impl DiagnosticSink for RecordingSink {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
    fn error(&self, _message: &str) {}
}

#[derive(Debug, Default)]
struct RecordingProgress {
    events: Mutex<Vec<(u64, u64)>>,
}

impl ProgressObserver for RecordingProgress {
    fn on_progress(&self, bytes_sent: u64, total_size: u64) {
        self.events.lock().unwrap().push((bytes_sent, total_size));
    }
}

fn test_spec() -> ObjectFsSpec {
    ObjectFsSpec {
        resumable_chunk_size: None,
        recursive_delete: true,
        retry: Retry {
            max_attempts: 5,
            delay: 0.001,
            multiplier: 2.0,
            jitter: 0.0,
        },
    }
}

fn make_fs(
    ops: &Arc<MockStoreOperations>,
    progress: Arc<dyn ProgressObserver>,
) -> Arc<ObjectFileSystem> {
    let ops: Arc<dyn ObjectStoreOperations> = ops.clone();
    ObjectFileSystem::new(ops, test_spec(), Arc::new(NullSink), progress)
}

fn make_uploader(ops: &Arc<MockStoreOperations>) -> Uploader {
    let ops: Arc<dyn ObjectStoreOperations> = ops.clone();
    Uploader::new(
        ops,
        Retrier::new(
            Arc::new(|duration| Box::pin(tokio::time::sleep(duration))),
            Arc::new(|duration| duration),
            test_spec().retry,
        ),
        Arc::new(NullSink),
        Arc::new(NullProgress),
    )
}

fn staged_file(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
}

fn patterned_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn normalize_returns_aligned_sizes_unchanged() {
    let sink = RecordingSink::default();
    assert_eq!(normalize_chunk_size(CHUNK_ALIGNMENT, &sink), CHUNK_ALIGNMENT);
    assert_eq!(
        normalize_chunk_size(CHUNK_ALIGNMENT * 7, &sink),
        CHUNK_ALIGNMENT * 7
    );
    assert_eq!(
        normalize_chunk_size(DEFAULT_CHUNK_SIZE, &sink),
        DEFAULT_CHUNK_SIZE
    );
    assert!(sink.warnings.lock().unwrap().is_empty());
}

#[test]
fn normalize_rounds_up_and_warns() {
    let sink = RecordingSink::default();
    for requested in [1, CHUNK_ALIGNMENT - 1, CHUNK_ALIGNMENT + 1, 0] {
        let corrected = normalize_chunk_size(requested, &sink);
        assert_eq!(corrected % CHUNK_ALIGNMENT, 0);
        assert!(corrected >= requested);
        assert!(corrected > 0);
        assert!(corrected - requested <= CHUNK_ALIGNMENT);
    }
    assert_eq!(sink.warnings.lock().unwrap().len(), 4);
}

#[test]
fn normalize_clamps_near_u64_max() {
    let sink = RecordingSink::default();
    let corrected = normalize_chunk_size(u64::MAX, &sink);
    // The next multiple of 256 KiB does not fit in a u64; the largest
    // representable one is returned instead of wrapping.
    assert_eq!(corrected, u64::MAX - (u64::MAX % CHUNK_ALIGNMENT));
    assert_eq!(corrected % CHUNK_ALIGNMENT, 0);
    assert_eq!(sink.warnings.lock().unwrap().len(), 1);
}

#[test]
fn strategy_prefers_single_shot_for_small_payloads() {
    let sink = NullSink;
    // File fits in one chunk.
    assert_eq!(
        select_upload_strategy(10 * 1024, DEFAULT_CHUNK_SIZE, &sink),
        UploadStrategy::SingleShot
    );
    // File below the alignment unit, even with a tiny chunk size.
    assert_eq!(
        select_upload_strategy(CHUNK_ALIGNMENT - 1, 1, &sink),
        UploadStrategy::SingleShot
    );
    // Exactly chunk-sized still goes single-shot.
    assert_eq!(
        select_upload_strategy(CHUNK_ALIGNMENT, CHUNK_ALIGNMENT, &sink),
        UploadStrategy::SingleShot
    );
}

#[test]
fn strategy_uses_resumable_with_normalized_chunk() {
    let sink = NullSink;
    assert_eq!(
        select_upload_strategy(600 * 1024, 256 * 1024, &sink),
        UploadStrategy::Resumable {
            chunk_size: 256 * 1024
        }
    );
    // Unaligned chunk sizes are corrected before the session starts.
    assert_eq!(
        select_upload_strategy(10 * 1024 * 1024, 300 * 1024, &sink),
        UploadStrategy::Resumable {
            chunk_size: 2 * CHUNK_ALIGNMENT
        }
    );
}

#[bucketfs_test]
async fn small_file_uploads_single_shot_without_session() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));
    let content = patterned_content(10 * 1024);
    let file = staged_file(&content);

    let dest = format!("gcs://{BUCKET_NAME}/test/sample_upload");
    let committed = fs.put_multipart(file.path(), &dest, None).await?;
    assert_eq!(committed, ObjectPath::new(BUCKET_NAME.to_string(), "test/sample_upload"));

    let call_counts = mock_ops.get_call_counts();
    assert_eq!(call_counts.write_calls.load(Ordering::Relaxed), 1);
    assert_eq!(call_counts.start_resumable_calls.load(Ordering::Relaxed), 0);
    assert_eq!(call_counts.upload_chunk_calls.load(Ordering::Relaxed), 0);
    assert_eq!(mock_ops.session_count().await, 0);
    assert_eq!(mock_ops.get_object(&committed).await, Some(content));
    Ok(())
}

#[bucketfs_test]
async fn large_file_uploads_in_sequential_chunks() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let progress = Arc::new(RecordingProgress::default());
    let fs = make_fs(&mock_ops, progress.clone());
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);

    let dest = format!("gcs://{BUCKET_NAME}/test/sample_upload_multipart");
    let committed = fs
        .put_multipart(file.path(), &dest, Some(256 * 1024))
        .await?;

    // 600 KiB at a 256 KiB chunk size: 256 + 256 + 88.
    let call_counts = mock_ops.get_call_counts();
    assert_eq!(call_counts.start_resumable_calls.load(Ordering::Relaxed), 1);
    assert_eq!(call_counts.upload_chunk_calls.load(Ordering::Relaxed), 3);
    assert_eq!(call_counts.write_calls.load(Ordering::Relaxed), 0);
    assert_eq!(mock_ops.session_count().await, 1);
    assert_eq!(mock_ops.get_object(&committed).await, Some(content));

    let total = 600 * 1024;
    assert_eq!(
        *progress.events.lock().unwrap(),
        vec![
            (256 * 1024, total),
            (512 * 1024, total),
            (600 * 1024, total),
        ]
    );
    Ok(())
}

#[bucketfs_test]
async fn chunk_upload_recovers_from_transient_failures() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);

    // Two transient failures, then the mock behaves again.
    mock_ops
        .push_failures(MockOp::UploadChunk, 2, Code::Unavailable)
        .await;

    let dest = format!("gcs://{BUCKET_NAME}/test/retry_upload");
    let committed = fs
        .put_multipart(file.path(), &dest, Some(256 * 1024))
        .await?;

    let call_counts = mock_ops.get_call_counts();
    // First chunk took 3 attempts, the remaining two took 1 each.
    assert_eq!(call_counts.upload_chunk_calls.load(Ordering::Relaxed), 5);
    assert_eq!(mock_ops.get_object(&committed).await, Some(content));
    Ok(())
}

#[bucketfs_test]
async fn exhausted_retry_budget_fails_the_session() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);

    // One more transient failure than the attempt budget allows.
    mock_ops
        .push_failures(MockOp::UploadChunk, 5, Code::Unavailable)
        .await;

    let dest = format!("gcs://{BUCKET_NAME}/test/doomed_upload");
    let result = fs.put_multipart(file.path(), &dest, Some(256 * 1024)).await;

    let err = result.unwrap_err();
    assert_eq!(err.code, Code::Unavailable);

    let call_counts = mock_ops.get_call_counts();
    assert_eq!(call_counts.upload_chunk_calls.load(Ordering::Relaxed), 5);
    // Nothing was committed.
    let dest_path = ObjectPath::new(BUCKET_NAME.to_string(), "test/doomed_upload");
    assert_eq!(mock_ops.get_object(&dest_path).await, None);
    Ok(())
}

#[bucketfs_test]
async fn fatal_error_aborts_without_consuming_retries() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);

    mock_ops
        .push_failure(
            MockOp::UploadChunk,
            make_err!(Code::PermissionDenied, "no write access"),
        )
        .await;

    let dest = format!("gcs://{BUCKET_NAME}/test/forbidden_upload");
    let result = fs.put_multipart(file.path(), &dest, Some(256 * 1024)).await;

    let err = result.unwrap_err();
    assert_eq!(err.code, Code::PermissionDenied);
    // The single fatal attempt is the only one made.
    let call_counts = mock_ops.get_call_counts();
    assert_eq!(call_counts.upload_chunk_calls.load(Ordering::Relaxed), 1);
    Ok(())
}

#[bucketfs_test]
async fn session_initiation_is_retried() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);

    mock_ops
        .push_failures(MockOp::StartResumable, 1, Code::Unavailable)
        .await;

    let dest = format!("gcs://{BUCKET_NAME}/test/slow_start");
    let committed = fs
        .put_multipart(file.path(), &dest, Some(256 * 1024))
        .await?;

    let call_counts = mock_ops.get_call_counts();
    assert_eq!(call_counts.start_resumable_calls.load(Ordering::Relaxed), 2);
    assert_eq!(mock_ops.get_object(&committed).await, Some(content));
    Ok(())
}

#[bucketfs_test]
async fn single_shot_insert_is_retried() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));
    let content = patterned_content(8 * 1024);
    let file = staged_file(&content);

    mock_ops
        .push_failures(MockOp::Write, 2, Code::Internal)
        .await;

    let dest = format!("gcs://{BUCKET_NAME}/test/small_retry");
    let committed = fs.put(file.path(), &dest).await?;

    let call_counts = mock_ops.get_call_counts();
    assert_eq!(call_counts.write_calls.load(Ordering::Relaxed), 3);
    assert_eq!(mock_ops.get_object(&committed).await, Some(content));
    Ok(())
}

#[bucketfs_test]
async fn missing_local_file_is_fatal() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));

    let dest = format!("gcs://{BUCKET_NAME}/test/missing_local");
    let result = fs
        .put_multipart(std::path::Path::new("/does/not/exist"), &dest, None)
        .await;

    assert_eq!(result.unwrap_err().code, Code::NotFound);
    let call_counts = mock_ops.get_call_counts();
    assert_eq!(call_counts.write_calls.load(Ordering::Relaxed), 0);
    assert_eq!(call_counts.start_resumable_calls.load(Ordering::Relaxed), 0);
    Ok(())
}

#[bucketfs_test]
async fn completed_session_ends_with_exact_byte_count() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let uploader = make_uploader(&mock_ops);
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);
    let dest = ObjectPath::new(BUCKET_NAME.to_string(), "test/session_complete");

    let upload_id = mock_ops
        .start_resumable_write(&dest, 600 * 1024)
        .await?;
    let mut session = UploadSession::new(dest.clone(), 600 * 1024, 256 * 1024, upload_id);
    assert_eq!(session.state(), SessionState::Initiated);
    assert_eq!(session.bytes_sent(), 0);

    uploader.send_chunks(&mut session, file.path()).await?;

    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.bytes_sent(), 600 * 1024);
    assert_eq!(mock_ops.get_object(&dest).await, Some(content));
    Ok(())
}

#[bucketfs_test]
async fn exhausted_session_ends_failed() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let uploader = make_uploader(&mock_ops);
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);
    let dest = ObjectPath::new(BUCKET_NAME.to_string(), "test/session_doomed");

    let upload_id = mock_ops
        .start_resumable_write(&dest, 600 * 1024)
        .await?;
    let mut session = UploadSession::new(dest.clone(), 600 * 1024, 256 * 1024, upload_id);
    mock_ops
        .push_failures(MockOp::UploadChunk, 5, Code::Unavailable)
        .await;

    let err = uploader
        .send_chunks(&mut session, file.path())
        .await
        .unwrap_err();

    assert_eq!(err.code, Code::Unavailable);
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.bytes_sent(), 0);
    assert_eq!(mock_ops.get_object(&dest).await, None);
    Ok(())
}

#[bucketfs_test]
async fn mismatched_server_ack_fails_with_data_loss() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let uploader = make_uploader(&mock_ops);
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);
    let dest = ObjectPath::new(BUCKET_NAME.to_string(), "test/short_ack");

    let upload_id = mock_ops
        .start_resumable_write(&dest, 600 * 1024)
        .await?;
    let mut session = UploadSession::new(dest.clone(), 600 * 1024, 256 * 1024, upload_id);
    // The server acknowledges fewer bytes than the chunk carried.
    mock_ops.push_short_ack(100).await;

    let err = uploader
        .send_chunks(&mut session, file.path())
        .await
        .unwrap_err();

    // A successful ack that disagrees with the local offset is
    // unrecoverable: no retry, no partial progress, nothing committed.
    assert_eq!(err.code, Code::DataLoss);
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.bytes_sent(), 0);
    let call_counts = mock_ops.get_call_counts();
    assert_eq!(call_counts.upload_chunk_calls.load(Ordering::Relaxed), 1);
    assert_eq!(mock_ops.get_object(&dest).await, None);
    Ok(())
}

#[bucketfs_test]
async fn mismatched_server_ack_surfaces_through_put_multipart() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));
    let content = patterned_content(600 * 1024);
    let file = staged_file(&content);

    mock_ops.push_short_ack(256 * 1024 - 1).await;

    let dest = format!("gcs://{BUCKET_NAME}/test/short_ack_e2e");
    let result = fs.put_multipart(file.path(), &dest, Some(256 * 1024)).await;

    assert_eq!(result.unwrap_err().code, Code::DataLoss);
    let dest_path = ObjectPath::new(BUCKET_NAME.to_string(), "test/short_ack_e2e");
    assert_eq!(mock_ops.get_object(&dest_path).await, None);
    Ok(())
}

#[bucketfs_test]
async fn round_trip_preserves_bytes_for_both_paths() -> Result<(), Error> {
    let mock_ops = Arc::new(MockStoreOperations::new());
    let fs = make_fs(&mock_ops, Arc::new(NullProgress));

    let small = patterned_content(4 * 1024);
    let large = patterned_content(900 * 1024);
    let small_file = staged_file(&small);
    let large_file = staged_file(&large);

    let small_uri = format!("gcs://{BUCKET_NAME}/roundtrip/small");
    let large_uri = format!("gcs://{BUCKET_NAME}/roundtrip/large");
    fs.put_multipart(small_file.path(), &small_uri, Some(256 * 1024))
        .await?;
    fs.put_multipart(large_file.path(), &large_uri, Some(256 * 1024))
        .await?;

    assert_eq!(fs.open_read(&small_uri).await?.content(), &small[..]);
    assert_eq!(fs.open_read(&large_uri).await?.content(), &large[..]);
    Ok(())
}
