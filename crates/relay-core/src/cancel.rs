//! Cancellation plumbing.
//!
//! A [`CancelToken`] is an explicit cancellation context passed into every
//! long-running operation: limiter waits, retry sleeps, provider calls, and
//! streaming iterators. Tokens form a hierarchy: cancelling a token cancels
//! all scopes derived from it, never its ancestors. A child scope inherits
//! the tighter of its own and its parent's deadline, and the original cancel
//! cause is preserved through the chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a scope was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    /// The caller abandoned the call.
    Caller,
    /// An internal deadline elapsed.
    Deadline,
    /// A racing sibling won first.
    Superseded,
}

type CauseCell = watch::Sender<Option<CancelKind>>;

/// Hierarchical cancellation token.
///
/// Cloning is cheap and observes the same scope. [`CancelToken::child`]
/// derives a nested scope that is cancelled whenever any ancestor is.
#[derive(Debug, Clone)]
pub struct CancelToken {
    /// Ancestor cause cells first, own cell last.
    levels: Arc<Vec<Arc<CauseCell>>>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Create a root token with no deadline.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            levels: Arc::new(vec![Arc::new(tx)]),
            deadline: None,
        }
    }

    /// Derive a nested scope. Cancelling the child never affects the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        let (tx, _rx) = watch::channel(None);
        let mut levels = self.levels.as_ref().clone();
        levels.push(Arc::new(tx));
        Self {
            levels: Arc::new(levels),
            deadline: self.deadline,
        }
    }

    /// Derive a nested scope whose deadline is the tighter of the parent's
    /// and `now + timeout`.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let mut child = self.child();
        let at = Instant::now() + timeout;
        child.deadline = Some(match self.deadline {
            Some(inherited) => inherited.min(at),
            None => at,
        });
        child
    }

    /// The effective deadline of this scope, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this scope and everything derived from it.
    ///
    /// The first cause wins; later calls are ignored.
    pub fn cancel(&self, kind: CancelKind) {
        if let Some(own) = self.levels.last() {
            own.send_if_modified(|cause| {
                if cause.is_none() {
                    *cause = Some(kind);
                    true
                } else {
                    false
                }
            });
        }
    }

    /// The cancellation cause, if this scope has been cancelled.
    ///
    /// An elapsed deadline reports [`CancelKind::Deadline`] even before any
    /// waiter observes it.
    #[must_use]
    pub fn cause(&self) -> Option<CancelKind> {
        for level in self.levels.iter() {
            if let Some(kind) = *level.borrow() {
                return Some(kind);
            }
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(CancelKind::Deadline),
            _ => None,
        }
    }

    /// Whether this scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Wait until this scope is cancelled and return the cause.
    pub async fn cancelled(&self) -> CancelKind {
        loop {
            if let Some(kind) = self.cause() {
                return kind;
            }
            let mut waits: Vec<Pin<Box<dyn Future<Output = ()> + Send>>> =
                Vec::with_capacity(self.levels.len());
            for level in self.levels.iter() {
                let mut rx = level.subscribe();
                waits.push(Box::pin(async move {
                    let _ = rx.wait_for(Option::is_some).await;
                }));
            }
            tokio::select! {
                _ = futures::future::select_all(waits) => {}
                () = sleep_until_opt(self.deadline) => {}
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
