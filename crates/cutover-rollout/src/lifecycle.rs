//! Fleet lifecycle seam.
//!
//! Promotion and retirement have effects outside the controller (scaling a
//! fleet down, tagging it as the new production fleet). Those effects go
//! through a `FleetLifecycle` implementation.

use tracing::info;

use cutover_core::Fleet;

use crate::BoxFuture;

/// Hooks called when a fleet is promoted or retired.
pub trait FleetLifecycle: Send + Sync {
    /// `green` now serves all traffic and `old_blue` has been demoted.
    fn promote<'a>(&'a self, green: &'a Fleet, old_blue: &'a Fleet)
    -> BoxFuture<'a, anyhow::Result<()>>;

    /// `fleet` receives no traffic and has been removed from the registry.
    fn retire<'a>(&'a self, fleet: &'a Fleet) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Lifecycle hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingLifecycle;

impl FleetLifecycle for LoggingLifecycle {
    fn promote<'a>(
        &'a self,
        green: &'a Fleet,
        old_blue: &'a Fleet,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(
                service = %green.service,
                fleet = %green.id,
                demoted = %old_blue.id,
                "fleet promoted"
            );
            Ok(())
        })
    }

    fn retire<'a>(&'a self, fleet: &'a Fleet) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(service = %fleet.service, fleet = %fleet.id, "fleet retired");
            Ok(())
        })
    }
}
