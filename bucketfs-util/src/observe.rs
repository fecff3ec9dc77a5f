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

use tracing::{debug, error, info, warn};

/// Severity-leveled diagnostic sink. Components hold an injected
/// instance instead of talking to a process-wide logger, so callers
/// control where observations end up (including nowhere).
pub trait DiagnosticSink: Send + Sync + core::fmt::Debug {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards diagnostics to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn debug(&self, message: &str) {
        debug!("{message}");
    }

    fn info(&self, message: &str) {
        info!("{message}");
    }

    fn warn(&self, message: &str) {
        warn!("{message}");
    }

    fn error(&self, message: &str) {
        error!("{message}");
    }
}

/// Discards all diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Observer for upload progress. Observations are advisory only and
/// must never influence control flow.
pub trait ProgressObserver: Send + Sync + core::fmt::Debug {
    fn on_progress(&self, bytes_sent: u64, total_size: u64);
}

/// Discards progress observations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressObserver for NullProgress {
    fn on_progress(&self, _bytes_sent: u64, _total_size: u64) {}
}

/// Logs a percent-complete line after each acknowledged chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressObserver for TracingProgress {
    fn on_progress(&self, bytes_sent: u64, total_size: u64) {
        let percent = if total_size == 0 {
            100.0
        } else {
            (bytes_sent as f64 / total_size as f64) * 100.0
        };
        debug!("Uploaded {bytes_sent} of {total_size} bytes ({percent:.0}%)");
    }
}
