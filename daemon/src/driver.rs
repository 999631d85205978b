use async_trait::async_trait;
use std::time::Duration;

use common::{DeviceConfig, ProxyConfig};

/// Identity and presentation options for one browser session. Assembled by
/// the executor from the job config; opaque to this core beyond presence
/// (the driver decides what it can honor).
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub proxy: Option<ProxyConfig>,
    pub device: DeviceConfig,
    pub headless: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("could not open session: {0}")]
    Session(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("driver action failed on '{selector}': {message}")]
    Action { selector: String, message: String },
    #[error("screenshot capture failed: {0}")]
    Screenshot(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// The external capability that actually drives a browser. Everything the
/// executor needs, nothing more: the engine behind it is not this crate's
/// concern.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn open_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn AutomationSession>, DriverError>;
}

#[async_trait]
pub trait AutomationSession: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError>;

    /// Clicks the element, racing a bounded wait for a page navigation.
    /// Returns whether navigation was observed.
    async fn click(&mut self, selector: &str) -> Result<bool, DriverError>;

    /// Waits for the selector to appear, bounded by `timeout`. Returns
    /// `Ok(false)` when the bound expires without a match; `Err` is
    /// reserved for driver-level failures.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, DriverError>;

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError>;

    /// Best-effort teardown; errors are swallowed by implementations.
    async fn close(&mut self);
}
