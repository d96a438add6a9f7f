use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{AutomataError, Result};

/// A cooperative cancellation signal. Clones share the same flag, so the caller keeps
/// one handle and passes another one to the operation. Every unbounded loop in this
/// crate polls the token once per iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that has not been tripped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token. All operations observing it will stop at their next poll.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`CancelToken::cancel`] was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Polls the token, yielding [`AutomataError::Cancelled`] for `operation` if it was tripped.
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            tracing::debug!("{operation} observed cancellation");
            Err(AutomataError::Cancelled { operation })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CancelToken;

    #[test]
    fn clones_share_flag() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(token.check("test").is_ok());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(token.check("test").unwrap_err().is_cancelled());
    }
}
