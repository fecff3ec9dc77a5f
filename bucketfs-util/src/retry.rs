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

use core::pin::Pin;
use core::time::Duration;
use std::sync::Arc;

use bucketfs_config::stores::Retry;
use bucketfs_error::{Code, Error, make_err};
use futures::future::Future;
use futures::stream::StreamExt;
use tracing::debug;

struct ExponentialBackoff {
    current: Duration,
    multiplier: f32,
}

impl ExponentialBackoff {
    const fn new(base: Duration, multiplier: f32) -> Self {
        Self {
            current: base,
            multiplier,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    // The first yielded delay is the base delay itself, so the wait
    // before attempt `n + 1` is `base * multiplier ^ (n - 1)`.
    fn next(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.current = self.current.mul_f32(self.multiplier);
        Some(delay)
    }
}

pub type SleepFn = Arc<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Sync + Send>;
pub type JitterFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

#[derive(PartialEq, Eq, Debug)]
pub enum RetryResult<T> {
    Ok(T),
    Retry(Error),
    Err(Error),
}

/// Returns true if the error code maps to a server-side overload or
/// transient-unavailability condition (the HTTP 500/502/503/504
/// family). Everything else is treated as permanent.
pub const fn is_transient(code: Code) -> bool {
    matches!(
        code,
        Code::Internal | Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted
    )
}

/// Class used to retry a job with a sleep function in between each retry.
#[derive(Clone)]
pub struct Retrier {
    sleep_fn: SleepFn,
    jitter_fn: JitterFn,
    config: Retry,
}

impl core::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Retrier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Retrier {
    pub fn new(sleep_fn: SleepFn, jitter_fn: JitterFn, config: Retry) -> Self {
        Self {
            sleep_fn,
            jitter_fn,
            config,
        }
    }

    fn backoff_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        // max_attempts counts the first attempt too, so there is one
        // fewer delay than attempts.
        ExponentialBackoff::new(
            Duration::try_from_secs_f32(self.config.delay).unwrap_or_default(),
            self.config.multiplier,
        )
        .map(|d| (self.jitter_fn)(d))
        .take(self.config.max_attempts.saturating_sub(1))
    }

    pub fn retry<'a, T, Fut>(
        &'a self,
        operation: Fut,
    ) -> Pin<Box<dyn Future<Output = Result<T, Error>> + 'a + Send>>
    where
        Fut: futures::stream::Stream<Item = RetryResult<T>> + Send + 'a,
        T: Send,
    {
        Box::pin(async move {
            let mut delays = self.backoff_delays();
            let mut operation = Box::pin(operation);
            let mut attempt = 0;
            loop {
                attempt += 1;
                match operation.next().await {
                    None => {
                        return Err(make_err!(
                            Code::Internal,
                            "Retry stream ended abruptly on attempt {attempt}",
                        ));
                    }
                    Some(RetryResult::Ok(value)) => return Ok(value),
                    Some(RetryResult::Err(e)) => {
                        return Err(e.append(format!("On attempt {attempt}")));
                    }
                    Some(RetryResult::Retry(e)) => {
                        if !is_transient(e.code) {
                            debug!("Not retrying permanent error on attempt {attempt}: {e:?}");
                            return Err(e);
                        }
                        (self.sleep_fn)(
                            delays
                                .next()
                                .ok_or_else(|| e.append(format!("On attempt {attempt}")))?,
                        )
                        .await;
                    }
                }
            }
        })
    }
}
