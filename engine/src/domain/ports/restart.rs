//! RestartController port
//! Back-edge from the HealthMonitor into the component that owns the
//! registry, expressed as a callback interface instead of a direct reference.

use async_trait::async_trait;

use crate::domain::Result;

/// Restarts a supervised process on behalf of the health policy
#[async_trait]
pub trait RestartController: Send + Sync {
    async fn restart_for_health(&self, process_id: &str) -> Result<()>;
}
