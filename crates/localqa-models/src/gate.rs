use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use localqa_core::{CallOptions, Error, Result};
use tokio::sync::Semaphore;

/// Bounds in-flight calls to the model service and applies per-call
/// cancellation and timeouts.
///
/// Clones share the same permits, so one gate can front both the embedding
/// and the generation provider.
#[derive(Debug, Clone)]
pub struct ModelGate {
    permits: Arc<Semaphore>,
}

impl ModelGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(max_concurrent.max(1))) }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `call` once a permit is free.
    ///
    /// Waiting for a permit is only bounded by cancellation; the timeout
    /// (`opts.timeout`, else `default_timeout`) covers the call itself.
    pub async fn run<T, F>(
        &self,
        opts: &CallOptions,
        default_timeout: Duration,
        on_timeout: fn(Duration) -> Error,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let wait = opts.timeout.unwrap_or(default_timeout);
        let _permit = tokio::select! {
            biased;
            () = opts.cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| Error::Cancelled)?,
        };

        tokio::select! {
            biased;
            () = opts.cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(wait, call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(on_timeout(wait)),
            },
        }
    }
}

impl Default for ModelGate {
    fn default() -> Self {
        Self::new(4)
    }
}
