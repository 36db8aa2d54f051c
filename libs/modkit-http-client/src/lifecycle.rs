//! Engine ownership shared between a client and its clones.
//!
//! A client built from a factory owns its engine. Clones derived from it with
//! [`HttpClient::config`](crate::HttpClient::config) hold the same
//! ownership: the engine is closed once, by whichever owner releases last.
//! An owner releases either by closing, or when its lifecycle token is
//! cancelled from outside (engine token cancellation, client drop). The
//! watcher doing the latter runs on the Tokio runtime the engine was created
//! in, so owned engines can only be created within a runtime.

use crate::engine::HttpEngine;
use crate::error::HttpError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

struct EngineLease {
    engine: Arc<dyn HttpEngine>,
    runtime: Handle,
    holders: AtomicUsize,
}

/// One owner's hold on a shared engine.
pub struct EngineOwnership {
    lease: Arc<EngineLease>,
    released: AtomicBool,
}

impl EngineOwnership {
    /// First owner of a freshly created engine.
    pub(crate) fn new(engine: Arc<dyn HttpEngine>, runtime: Handle) -> Self {
        Self {
            lease: Arc::new(EngineLease {
                engine,
                runtime,
                holders: AtomicUsize::new(1),
            }),
            released: AtomicBool::new(false),
        }
    }

    /// Another owner of the same engine.
    ///
    /// # Errors
    /// Returns [`HttpError::EngineClosed`] if every owner already released,
    /// i.e. the engine is closed or closing.
    pub(crate) fn share(&self) -> Result<Self, HttpError> {
        self.lease
            .holders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .map_err(|_| HttpError::EngineClosed(self.lease.engine.name().to_owned()))?;
        Ok(Self {
            lease: self.lease.clone(),
            released: AtomicBool::new(false),
        })
    }

    /// Give up this hold. Returns `true` exactly once per engine: for the
    /// release of the last holder, which must close the engine.
    pub(crate) fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.lease.holders.fetch_sub(1, Ordering::AcqRel) == 1
    }

    #[cfg(test)]
    pub(crate) fn holders(&self) -> usize {
        self.lease.holders.load(Ordering::Acquire)
    }
}

/// Close the owned engine once `token` is cancelled by anyone other than
/// [`HttpClient::close`](crate::HttpClient::close), which releases first.
pub fn watch_owned_engine(ownership: Arc<EngineOwnership>, token: CancellationToken) {
    let runtime = ownership.lease.runtime.clone();
    runtime.spawn(async move {
        token.cancelled().await;
        if ownership.release() {
            let engine = &ownership.lease.engine;
            tracing::debug!(engine = engine.name(), "client lifecycle ended; closing owned engine");
            if let Err(err) = engine.close().await {
                tracing::warn!(engine = engine.name(), error = %err, "failed to close owned engine");
            }
        }
    });
}
