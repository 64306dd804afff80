//! Single-threaded cooperative scheduler.
//!
//! The Reactor owns a current-thread tokio runtime plus a [`LocalSet`];
//! every connection driver is a non-`Send` local task, so exactly one
//! readiness callback runs at a time and `Rc`/`RefCell` state needs no
//! locking. Multiple independent Reactors may coexist in one process,
//! each owning a disjoint set of sockets; none of their state is shared.
//!
//! Suspension happens only at I/O and timer boundaries inside drivers.
//! An I/O error in one driver closes that connection and fails its
//! pending continuation; the Reactor itself keeps running.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinHandle, LocalSet};

const RUN_SLICE: Duration = Duration::from_millis(100);

pub struct Reactor {
    rt: tokio::runtime::Runtime,
    local: LocalSet,
    stopped: Arc<AtomicBool>,
}

/// Cloneable handle that lets handler code (or a signal task) stop the
/// loop after its current iteration.
#[derive(Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

impl Reactor {
    pub fn new() -> std::io::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            rt,
            local: LocalSet::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Register a connection or listener driver. Bookkeeping only:
    /// nothing runs until the loop is driven. Readiness interest is
    /// delegated to the runtime's I/O driver.
    pub fn register<F>(&self, driver: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.spawn_local(driver)
    }

    /// Drive all ready drivers, blocking up to `timeout` for readiness.
    /// Callbacks fire synchronously on this thread, in readiness order.
    pub fn run_once(&self, timeout: Duration) {
        self.local.block_on(&self.rt, tokio::time::sleep(timeout));
    }

    /// Loop `run_once` until [`Reactor::stop`] (or a [`StopHandle`]).
    pub fn run_forever(&self) {
        while !self.stopped.load(Ordering::Relaxed) {
            self.run_once(RUN_SLICE);
        }
        tracing::info!("reactor stopped");
    }

    /// Signal the loop to exit after the current iteration.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stopped: self.stopped.clone(),
        }
    }

    /// Blocking helper for bootstrap and synchronous tests: drives the
    /// loop until `designated` resolves, then returns its result.
    ///
    /// Never call this from handler code running on the Reactor — the
    /// single thread would deadlock. Nested `wait` calls are disallowed
    /// for the same reason.
    pub fn wait<F: Future>(&self, designated: F) -> F::Output {
        self.local.block_on(&self.rt, designated)
    }
}
