//! Shutdown signal shared by every long-running task.

use tokio_util::sync::CancellationToken;

/// Write-once, read-many shutdown signal.
///
/// Clones observe the same signal. A [`child`](Shutdown::child) fires along
/// with its parent, but triggering the child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new, untriggered signal.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derive a signal that is triggered whenever this one is.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Trigger the shutdown signal. Later calls are no-ops.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal has been triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}
