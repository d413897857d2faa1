use super::hmm::GaussianHmm;
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Current fitted model shared by inference requests
///
/// The model is created on first use and replaced wholesale on refit. Readers
/// receive an `Arc` snapshot, so a refit never mutates a model that another
/// request is reading. Cloning a `ModelState` shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    inner: Arc<RwLock<Option<Arc<GaussianHmm>>>>,
    /// Serialises first-use initialisation without blocking readers
    init: Arc<Mutex<()>>,
}

impl ModelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current model, if one has been fitted
    pub async fn current(&self) -> Option<Arc<GaussianHmm>> {
        self.inner.read().await.clone()
    }

    /// Install a freshly fitted model, returning the one it replaces
    pub async fn replace(&self, model: GaussianHmm) -> Option<Arc<GaussianHmm>> {
        let mut slot = self.inner.write().await;
        slot.replace(Arc::new(model))
    }

    /// Return the current model, fitting one with `init` if the slot is empty
    ///
    /// Concurrent first requests fit only once. Readers of [`ModelState::current`]
    /// are not blocked while `init` runs.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<GaussianHmm>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GaussianHmm>>,
    {
        if let Some(model) = self.current().await {
            return Ok(model);
        }

        let _guard = self.init.lock().await;
        if let Some(model) = self.current().await {
            return Ok(model);
        }

        let model = Arc::new(init().await?);
        let mut slot = self.inner.write().await;
        match slot.as_ref() {
            // A refit landed while we were fitting; keep the newer model
            Some(existing) => Ok(Arc::clone(existing)),
            None => {
                *slot = Some(Arc::clone(&model));
                tracing::info!("Regime model initialised");
                Ok(model)
            }
        }
    }

    pub async fn clear(&self) {
        self.inner.write().await.take();
    }
}
