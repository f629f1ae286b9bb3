//! Error types for the expiring pool

use thiserror::Error;

/// Errors surfaced by [`ExpiringPool`](crate::ExpiringPool) operations.
///
/// `E` is the error type shared by the pool's constructor and destructor
/// callbacks; it is carried verbatim as the error source.
#[derive(Error, Debug)]
pub enum PoolError<K, E> {
    /// The constructor failed for a key that was not yet tracked.
    /// No entry was created.
    #[error("failed to construct pooled value")]
    Construction(#[source] E),

    /// The destructor failed while evicting or clearing `key`.
    ///
    /// The key is no longer tracked by the pool; its value is abandoned.
    #[error("failed to destroy pooled value for key {key:?}")]
    Destruction {
        key: K,
        #[source]
        source: E,
    },
}

impl<K, E> PoolError<K, E> {
    /// The key whose value could not be destroyed, if any
    pub fn key(&self) -> Option<&K> {
        match self {
            PoolError::Construction(_) => None,
            PoolError::Destruction { key, .. } => Some(key),
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, PoolError::Construction(_))
    }

    pub fn is_destruction(&self) -> bool {
        matches!(self, PoolError::Destruction { .. })
    }

    /// The callback error that caused this failure
    pub fn callback_error(&self) -> &E {
        match self {
            PoolError::Construction(source) => source,
            PoolError::Destruction { source, .. } => source,
        }
    }
}

pub type PoolResult<T, K, E> = Result<T, PoolError<K, E>>;
