//! Acoustic model provisioning.
//!
//! A session asks its [`ModelProvider`] for the model exactly once, at
//! construction. Provisioning is asynchronous: the provider answers through
//! a callback, possibly from another thread, possibly long after the
//! session has been closed.

pub mod local;

use crate::error::{EarshotError, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

pub use local::{LocalModel, LocalModelProvider};

/// A provisioned acoustic model, shared by every engine the session creates.
pub trait Model: Send + Sync + fmt::Debug {
    /// Asset name the model was provisioned from.
    fn name(&self) -> &str;

    /// Release the underlying resources. Best-effort.
    fn release(&self) -> Result<()>;
}

/// Which asset to provision and where to cache it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub asset_id: String,
    pub cache_key: String,
}

impl ProvisionRequest {
    pub fn new(asset_id: impl Into<String>, cache_key: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            cache_key: cache_key.into(),
        }
    }
}

/// Completion callback for a provisioning request.
pub type ProvisionCallback = Box<dyn FnOnce(Result<Arc<dyn Model>>) + Send + 'static>;

/// Source of acoustic models.
pub trait ModelProvider: Send + Sync {
    /// Start provisioning `request`; `done` is invoked exactly once.
    fn provision(&self, request: ProvisionRequest, done: ProvisionCallback);
}

/// Implement ModelProvider for Arc<T> so providers can be shared and inspected.
impl<T: ModelProvider> ModelProvider for Arc<T> {
    fn provision(&self, request: ProvisionRequest, done: ProvisionCallback) {
        (**self).provision(request, done)
    }
}

/// Model with no backing resources.
#[derive(Debug, Default)]
pub struct InMemoryModel {
    name: String,
    releases: Arc<AtomicUsize>,
}

impl InMemoryModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            releases: Arc::default(),
        }
    }
}

impl Model for InMemoryModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider handing out [`InMemoryModel`]s from a background thread.
///
/// Used by the replay command and by tests; the delay and failure knobs
/// simulate slow or broken asset unpacking.
#[derive(Debug, Default)]
pub struct InMemoryModelProvider {
    delay: Duration,
    failure: Option<String>,
    requests: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl InMemoryModelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer only after `delay` has elapsed.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every request with `message`.
    pub fn with_failure(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Number of provisioning requests received.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of `release` calls on models handed out by this provider.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl ModelProvider for InMemoryModelProvider {
    fn provision(&self, request: ProvisionRequest, done: ProvisionCallback) {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay;
        let failure = self.failure.clone();
        let releases = self.releases.clone();

        thread::spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let result: Result<Arc<dyn Model>> = match failure {
                Some(message) => Err(EarshotError::ProvisionFailed { message }),
                None => Ok(Arc::new(InMemoryModel {
                    name: request.asset_id,
                    releases,
                })),
            };
            done(result);
        });
    }
}
