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

use serde::{Deserialize, Serialize};

/// Configuration for an object-store backed filesystem.
///
/// This struct is assembled once by the caller and handed to
/// `ObjectFileSystem`; nothing in the core reads configuration from
/// the environment on its own.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ObjectFsSpec {
    /// Chunk size in bytes for resumable uploads. Sizes that are not a
    /// multiple of 256 KiB are rounded up to the next multiple before
    /// use (the final chunk of a session may be shorter).
    ///
    /// Default: 64 MiB
    #[serde(default)]
    pub resumable_chunk_size: Option<u64>,

    /// Whether `remove` on a non-empty directory prefix deletes every
    /// object under it. With this disabled, removing a non-empty
    /// directory is rejected as caller misuse.
    ///
    /// Default: true
    #[serde(default = "default_recursive_delete")]
    pub recursive_delete: bool,

    /// Retry configuration to use when a request fails with a
    /// transient error.
    #[serde(default)]
    pub retry: Retry,
}

impl Default for ObjectFsSpec {
    fn default() -> Self {
        Self {
            resumable_chunk_size: None,
            recursive_delete: default_recursive_delete(),
            retry: Retry::default(),
        }
    }
}

const fn default_recursive_delete() -> bool {
    true
}

/// Retry policy for transient request failures. Immutable for the
/// lifetime of the component holding it.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Retry {
    /// Maximum number of attempts per operation, including the first
    /// one. Setting this to 1 disables retrying entirely.
    ///
    /// Default: 5
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base delay in seconds for exponential back off. The wait before
    /// attempt `n + 1` is `delay * multiplier ^ (n - 1)`.
    ///
    /// Default: 1.0
    #[serde(default = "default_delay")]
    pub delay: f32,

    /// Growth factor applied to the delay after each failed attempt.
    ///
    /// Default: 2.0
    #[serde(default = "default_multiplier")]
    pub multiplier: f32,

    /// Amount of jitter to add as a percentage in decimal form. This will
    /// change the formula like:
    /// ```haskell
    /// random(
    ///    {delay} * ({multiplier} ^ {attempt_number}) * (1 - (jitter / 2)),
    ///    {delay} * ({multiplier} ^ {attempt_number}) * (1 + (jitter / 2)),
    /// )
    /// ```
    #[serde(default)]
    pub jitter: f32,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: default_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

const fn default_max_attempts() -> usize {
    5
}

const fn default_delay() -> f32 {
    1.0
}

const fn default_multiplier() -> f32 {
    2.0
}
