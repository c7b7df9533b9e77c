//! Cancellable deadline context for provider calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::providers::ProviderError;

/// Deadline and cancellation signal carried into every provider operation.
///
/// Clones share the same cancellation token, so cancelling any clone cancels
/// all of them.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl CallContext {
    /// A context with no deadline that is only cancelled explicitly.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context with an absolute deadline.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// A child context that is cancelled with `self` and whose deadline is the
    /// earlier of the parent's and `timeout` from now.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let requested = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => parent.min(requested),
            None => requested,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    /// The deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and every clone and child of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the error this context has already fired with, if any.
    ///
    /// # Errors
    /// Returns `Cancelled` or `DeadlineExceeded` once the context is done.
    pub fn check(&self) -> Result<(), ProviderError> {
        if self.token.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ProviderError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` racing against this context.
    ///
    /// The future is dropped the instant the context fires; its result is
    /// never returned late.
    ///
    /// # Errors
    /// Returns the future's own error, or `Cancelled` / `DeadlineExceeded`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        self.check()?;

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(ProviderError::Cancelled),
            () = expired => Err(ProviderError::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleep for `duration` unless the context fires first.
    ///
    /// # Errors
    /// Returns `Cancelled` / `DeadlineExceeded` if the context fires.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ProviderError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
