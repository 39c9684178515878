use std::time::Duration;

use async_trait::async_trait;

/// Delays inserted between organizations calls that race each other.
#[async_trait]
pub trait Pacing: Send + Sync {
    /// Before every single attach call.
    async fn before_attach(&self);
    /// Before the one retry of a detach that hit "policy in use".
    async fn before_detach_retry(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct FixedPacing {
    pub attach_delay: Duration,
    pub detach_retry_delay: Duration,
}

impl Default for FixedPacing {
    fn default() -> Self {
        Self {
            attach_delay: Duration::from_secs(5),
            detach_retry_delay: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Pacing for FixedPacing {
    async fn before_attach(&self) {
        tokio::time::sleep(self.attach_delay).await;
    }

    async fn before_detach_retry(&self) {
        tokio::time::sleep(self.detach_retry_delay).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

#[async_trait]
impl Pacing for NoPacing {
    async fn before_attach(&self) {}
    async fn before_detach_retry(&self) {}
}
