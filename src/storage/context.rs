// Copyright 2025 Adobe. All rights reserved.
// This file is licensed to you under the Apache License,
// Version 2.0 (http://www.apache.org/licenses/LICENSE-2.0)
// or the MIT license (http://opensource.org/licenses/MIT),
// at your option.
//
// Unless required by applicable law or agreed to in writing,
// this software is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR REPRESENTATIONS OF ANY KIND, either express or
// implied. See the LICENSE-MIT and LICENSE-APACHE files for the
// specific language governing permissions and limitations under
// each license.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{StorageError, StorageResult};

/// Cancellation signal and deadline for one storage call.
///
/// Cloning a context shares its token, so cancelling any clone cancels every
/// call made with it. The timeout covers the whole call, including the body of
/// a download.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    timeout: Option<Duration>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context cancelled through `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Start the clock for `operation`.
    pub(crate) fn guard(&self, operation: impl Into<String>) -> CallGuard {
        CallGuard {
            token: self.token.clone(),
            timeout: self.timeout,
            deadline: self.timeout.map(|t| Instant::now() + t),
            operation: operation.into(),
        }
    }

    /// Run `fut` as `operation` under this context.
    pub(crate) async fn run<T, F>(&self, operation: &str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.guard(operation).run(fut).await
    }
}

/// A started call: owns the token and the absolute deadline.
///
/// Download bodies keep their guard after the call returns so the deadline
/// keeps applying while the caller drains the stream.
#[derive(Debug, Clone)]
pub(crate) struct CallGuard {
    token: CancellationToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    operation: String,
}

impl CallGuard {
    pub(crate) fn cancelled(&self) -> StorageError {
        StorageError::cancelled(self.operation.clone())
    }

    pub(crate) fn timed_out(&self) -> StorageError {
        StorageError::TimedOut {
            operation: self.operation.clone(),
            after: self.timeout.unwrap_or_default(),
        }
    }

    /// Fail fast if the call is already cancelled or out of time.
    pub(crate) fn check(&self) -> StorageResult<()> {
        if self.token.is_cancelled() {
            return Err(self.cancelled());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(self.timed_out()),
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it completes, the token fires, or the deadline passes.
    ///
    /// When the token or deadline wins, `fut` is dropped before this returns.
    pub(crate) async fn run<T, F>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.cancelled()),
            _ = deadline => Err(self.timed_out()),
            result = fut => result,
        }
    }
}
