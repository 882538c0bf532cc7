use std::ops::Deref;

use tracing::error;

use crate::disco::Error;
use crate::ingress::ResourceKey;

/// Where errors go that retrying alone cannot resolve.
pub trait ErrorSink {
    fn report(&self, key: &ResourceKey, err: &Error);
}

impl<E, T> ErrorSink for T
where
    T: Deref<Target = E>,
    E: ErrorSink,
{
    fn report(&self, key: &ResourceKey, err: &Error) {
        self.deref().report(key, err)
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, key: &ResourceKey, err: &Error) {
        error!(%key, %err, needs_attention = err.needs_attention(), "reconcile error reported");
    }
}

/// How often a failing key is retried before it is dropped.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RetryPolicy {
    Unbounded,
    GiveUpAfter(u32),
}

impl RetryPolicy {
    /// `0` retries forever.
    pub fn from_max_requeues(max_requeues: u32) -> Self {
        match max_requeues {
            0 => RetryPolicy::Unbounded,
            n => RetryPolicy::GiveUpAfter(n),
        }
    }

    pub fn should_retry(&self, requeues: u32) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::GiveUpAfter(max) => requeues < *max,
        }
    }
}
