//! Cooperative cancellation for scans.
//!
//! A scan checks its token between directories and between files, and once
//! more immediately before committing a registration. Hash computation for a
//! single file may briefly outlive a cancellation; the commit-time re-check
//! discards its result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, ShareError};

/// A cloneable cancellation flag shared between a scan thread and the code
/// that may want to replace it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns true once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Err(Interrupted)` once cancelled, enabling `token.check()?`
    /// early returns.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ShareError::Interrupted)
        } else {
            Ok(())
        }
    }
}
