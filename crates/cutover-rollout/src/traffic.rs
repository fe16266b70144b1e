//! Traffic routing seam.
//!
//! The controller never talks to a load balancer directly. It asks a
//! `TrafficRouter` to set the blue/green split and only records the new
//! weights once the router has accepted them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use tracing::info;

use cutover_core::{Fleet, FleetId};

use crate::BoxFuture;

/// Applies a weighted split between two fleets of the same service.
pub trait TrafficRouter: Send + Sync {
    /// Route `green_weight` percent to `green` and the rest to `blue`.
    fn set_weights<'a>(
        &'a self,
        blue: &'a Fleet,
        green: &'a Fleet,
        green_weight: u8,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// In-process router that keeps the last applied split in a table.
///
/// Used by `cutoverd` when no external load balancer is configured, and by
/// tests to check what the controller asked for.
#[derive(Default)]
pub struct WeightTable {
    weights: RwLock<HashMap<FleetId, u8>>,
    calls: AtomicUsize,
}

impl WeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last weight routed to a fleet, if any split involving it was applied.
    pub fn weight_of(&self, fleet_id: &str) -> Option<u8> {
        let weights = self.weights.read().unwrap_or_else(|e| e.into_inner());
        weights.get(fleet_id).copied()
    }

    /// Number of `set_weights` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TrafficRouter for WeightTable {
    fn set_weights<'a>(
        &'a self,
        blue: &'a Fleet,
        green: &'a Fleet,
        green_weight: u8,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            anyhow::ensure!(green_weight <= 100, "weight {green_weight} exceeds 100");
            {
                let mut weights = self.weights.write().unwrap_or_else(|e| e.into_inner());
                weights.insert(blue.id.clone(), 100 - green_weight);
                weights.insert(green.id.clone(), green_weight);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            info!(
                blue = %blue.id,
                green = %green.id,
                green_weight,
                "weights applied"
            );
            Ok(())
        })
    }
}
