//! Per-session context shared between the controller and its workers
//!
//! One `TunnelSession` exists per `open()` call. It carries the cancellation
//! flag, the live worker count and the completion signal that wakes the
//! thread blocked in `open()` once the last worker has exited.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;
use uuid::Uuid;

use crate::stats::TunnelStats;

pub struct TunnelSession {
    id: Uuid,
    cancelled: AtomicBool,
    workers: AtomicUsize,
    completion: Sender<()>,
    stats: TunnelStats,
}

impl TunnelSession {
    /// Create a session and the receiving end of its completion signal.
    pub fn new() -> (Arc<Self>, Receiver<()>) {
        let (completion, done) = crossbeam_channel::bounded(1);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            cancelled: AtomicBool::new(false),
            workers: AtomicUsize::new(0),
            completion,
            stats: TunnelStats::new(),
        });
        (session, done)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cooperative shutdown. Workers notice it at their next poll
    /// timeout.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn active_workers(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &TunnelStats {
        &self.stats
    }

    /// Register a worker. The returned guard deregisters it on drop.
    ///
    /// All guards for a session must be taken before any worker starts,
    /// otherwise an early exit could bring the count to zero prematurely.
    pub fn enter(self: &Arc<Self>) -> WorkerGuard {
        self.workers.fetch_add(1, Ordering::AcqRel);
        WorkerGuard {
            session: Arc::clone(self),
        }
    }
}

/// Live-worker registration. Dropping the last guard fires the completion
/// signal.
pub struct WorkerGuard {
    session: Arc<TunnelSession>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        // Only the decrement that observes 1 fires; concurrent exits cannot
        // both see it.
        if self.session.workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!(session_id = %self.session.id, "Last worker exited");
            let _ = self.session.completion.try_send(());
        }
    }
}
