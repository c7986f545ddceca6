//! Tunnel lifecycle
//!
//! `TunnelController::open` opens the device, starts the workers and blocks
//! until the last of them exits. `close` only raises the session's
//! cancellation flag; the thread inside `open` performs the whole teardown
//! and notifies the host exactly once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::blocklist::Blocklist;
use crate::bridge::HostNotifier;
use crate::config::TunnelConfig;
use crate::device::{DeviceFactory, TunnelDevice};
use crate::dispatch::Dispatcher;
use crate::error::{ConfigError, Result, TunnelError};
use crate::session::{TunnelSession, WorkerGuard};
use crate::stats::StatsSnapshot;
use crate::worker::{WorkerContext, WorkerExit, run_worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    Closed,
    Opening,
    Running,
    Closing,
}

impl TunnelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelState::Closed => "closed",
            TunnelState::Opening => "opening",
            TunnelState::Running => "running",
            TunnelState::Closing => "closing",
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Lifecycle {
    state: TunnelState,
    session: Option<Arc<TunnelSession>>,
}

pub struct TunnelController<F: DeviceFactory> {
    factory: F,
    config: TunnelConfig,
    blocklist: Arc<Blocklist>,
    dispatcher: Dispatcher,
    notifier: Arc<dyn HostNotifier>,
    lifecycle: Mutex<Lifecycle>,
}

impl<F: DeviceFactory> TunnelController<F> {
    /// Create a controller. The blocklist is built from the config's seed
    /// and empty-update policy.
    pub fn new(
        factory: F,
        config: TunnelConfig,
        dispatcher: Dispatcher,
        notifier: Arc<dyn HostNotifier>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let blocklist = Arc::new(config.blocklist.build());
        Ok(Self {
            factory,
            config,
            blocklist,
            dispatcher,
            notifier,
            lifecycle: Mutex::new(Lifecycle {
                state: TunnelState::Closed,
                session: None,
            }),
        })
    }

    pub fn state(&self) -> TunnelState {
        self.lock().state
    }

    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Counters of the running session, if any.
    pub fn current_stats(&self) -> Option<StatsSnapshot> {
        self.lock()
            .session
            .as_ref()
            .map(|session| session.stats().snapshot())
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: TunnelState) {
        {
            let mut lifecycle = self.lock();
            lifecycle.state = state;
            if state == TunnelState::Closed {
                lifecycle.session = None;
            }
        }
        debug!(state = state.as_str(), "Tunnel state changed");
        self.notifier.on_state_changed(state);
    }

    /// Run a tunnel session to completion.
    ///
    /// Blocks the calling thread until every worker has exited, whether
    /// through `close()` or a device failure, then tears the device down.
    pub fn open(&self) -> Result<StatsSnapshot> {
        let (session, done) = {
            let mut lifecycle = self.lock();
            if lifecycle.state != TunnelState::Closed {
                return Err(TunnelError::AlreadyRunning);
            }
            let (session, done) = TunnelSession::new();
            lifecycle.state = TunnelState::Opening;
            lifecycle.session = Some(Arc::clone(&session));
            (session, done)
        };
        self.notifier.on_state_changed(TunnelState::Opening);

        let session_id = session.id();
        info!(
            %session_id,
            device = %self.config.device.name,
            workers = self.config.workers,
            blocked = self.blocklist.len(),
            "Opening tunnel"
        );

        let device = match self.factory.open() {
            Ok(device) => Arc::new(device),
            Err(e) => {
                error!(%session_id, error = %e, "Failed to open tunnel device");
                self.set_state(TunnelState::Closed);
                return Err(TunnelError::DeviceUnavailable(e));
            }
        };

        let handles = self.spawn_workers(&session, &device);
        self.set_state(TunnelState::Running);
        info!(%session_id, workers = handles.len(), "Tunnel running");

        // The session holds the sender, so this only returns on the signal
        if done.recv().is_err() {
            warn!(%session_id, "Completion channel disconnected");
        }

        self.teardown(&session, device, handles)
    }

    /// Spawn the configured number of workers.
    ///
    /// Every guard is taken before the first spawn so that an early exit
    /// cannot bring the worker count to zero while others are still
    /// starting.
    fn spawn_workers(
        &self,
        session: &Arc<TunnelSession>,
        device: &Arc<F::Device>,
    ) -> Vec<JoinHandle<WorkerExit>> {
        let guards: Vec<WorkerGuard> = (0..self.config.workers)
            .map(|_| session.enter())
            .collect();
        let mut handles = Vec::with_capacity(guards.len());

        for (index, guard) in guards.into_iter().enumerate() {
            let ctx = WorkerContext {
                index,
                device: Arc::clone(device),
                session: Arc::clone(session),
                blocklist: Arc::clone(&self.blocklist),
                dispatcher: self.dispatcher.clone(),
                poll_timeout: self.config.poll_timeout(),
                mtu: self.config.device.mtu,
            };
            let spawned = thread::Builder::new()
                .name(format!("tunmode-{index}"))
                .spawn(move || {
                    let _guard = guard;
                    run_worker(ctx)
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // The closure (and its guard) was dropped with the error
                    error!(
                        session_id = %session.id(),
                        worker = index,
                        error = %e,
                        "Failed to spawn tunnel worker"
                    );
                    session.cancel();
                }
            }
        }
        handles
    }

    fn teardown(
        &self,
        session: &Arc<TunnelSession>,
        mut device: Arc<F::Device>,
        handles: Vec<JoinHandle<WorkerExit>>,
    ) -> Result<StatsSnapshot> {
        let session_id = session.id();

        for handle in handles {
            match handle.join() {
                Ok(exit) if exit.is_error() => {
                    debug!(%session_id, exit = ?exit, "Worker ended with error")
                }
                Ok(_) => {}
                Err(_) => error!(%session_id, "Tunnel worker panicked"),
            }
        }

        self.set_state(TunnelState::Closing);

        // All workers are joined, so this is the last reference
        match Arc::get_mut(&mut device) {
            Some(device) => device.close(),
            None => warn!(%session_id, "Tunnel device still shared at teardown"),
        }

        let stats = session.stats().snapshot();
        info!(
            %session_id,
            packets = stats.packets_read,
            blocked = stats.blocked,
            tcp = stats.dispatched_tcp,
            udp = stats.dispatched_udp,
            unsupported = stats.unsupported,
            unparsed = stats.unparsed,
            "Tunnel closed"
        );

        self.set_state(TunnelState::Closed);
        self.notifier.on_tunnel_closed();
        Ok(stats)
    }

    /// Request shutdown of the running session.
    ///
    /// Never blocks. Workers notice the request within one poll timeout.
    pub fn close(&self) {
        let lifecycle = self.lock();
        match (lifecycle.state, lifecycle.session.as_ref()) {
            (TunnelState::Opening | TunnelState::Running, Some(session)) => {
                if !session.is_cancelled() {
                    info!(session_id = %session.id(), "Tunnel close requested");
                }
                session.cancel();
            }
            (state, _) => {
                debug!(state = state.as_str(), "Close requested, tunnel not running");
            }
        }
    }
}
