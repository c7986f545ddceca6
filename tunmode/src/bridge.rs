//! Host-facing surface
//!
//! The host application drives the tunnel through four entry points:
//! pushing the blocklist, opening the tunnel, requesting close, and being
//! told when the tunnel has closed. `HostBridge` is the inbound half;
//! `HostNotifier` is the outbound half, implemented by the host.

use std::sync::Arc;

use crate::blocklist::{BlocklistUpdate, UpdateOutcome};
use crate::controller::{TunnelController, TunnelState};
use crate::device::DeviceFactory;
use crate::error::Result;
use crate::stats::StatsSnapshot;

/// Callbacks into the host. Invoked from the thread running `open_tunnel`.
pub trait HostNotifier: Send + Sync {
    /// The tunnel has shut down and its device is closed. Called once per
    /// session that got past device open.
    fn on_tunnel_closed(&self);

    /// Lifecycle transition, for host UI state.
    fn on_state_changed(&self, _state: TunnelState) {}
}

/// Notifier for hosts that don't need callbacks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl HostNotifier for NoopNotifier {
    fn on_tunnel_closed(&self) {}
}

pub struct HostBridge<F: DeviceFactory> {
    controller: Arc<TunnelController<F>>,
}

impl<F: DeviceFactory> Clone for HostBridge<F> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
        }
    }
}

impl<F: DeviceFactory> HostBridge<F> {
    pub fn new(controller: TunnelController<F>) -> Self {
        Self {
            controller: Arc::new(controller),
        }
    }

    /// Replace the blocklist. Safe to call from any thread, whether or not
    /// the tunnel is running.
    pub fn update_blocked_ips(&self, update: impl Into<BlocklistUpdate>) -> UpdateOutcome {
        self.controller.blocklist().update(update)
    }

    pub fn blocked_ips(&self) -> Arc<Vec<String>> {
        self.controller.blocklist().snapshot()
    }

    /// Open the tunnel and block until it closes.
    pub fn open_tunnel(&self) -> Result<StatsSnapshot> {
        self.controller.open()
    }

    /// Request shutdown. Returns immediately.
    pub fn close_tunnel(&self) {
        self.controller.close()
    }

    pub fn state(&self) -> TunnelState {
        self.controller.state()
    }

    pub fn controller(&self) -> &Arc<TunnelController<F>> {
        &self.controller
    }
}
