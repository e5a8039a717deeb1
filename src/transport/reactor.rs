//! # Reactor Thread
//!
//! One OS thread driving a single-threaded Tokio runtime. Every connection
//! task of a client or server is spawned onto its reactor, so connection
//! state is only ever touched from that one thread.
//!
//! Other threads reach the reactor through the runtime [`Handle`]: spawning a
//! task there is the equivalent of posting work onto the event loop.

use crate::error::{constants, NetError, Result};
use std::thread::{self, JoinHandle};
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// A running event loop on a dedicated thread
#[derive(Debug)]
pub struct Reactor {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Build the runtime and start the thread that drives it
    pub fn start(name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NetError::Runtime(format!("{}: {e}", constants::ERR_REACTOR_RUNTIME)))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(reactor = %thread_name, "Reactor running");
                runtime.block_on(async {
                    // A dropped sender also ends the loop
                    let _ = shutdown_rx.await;
                });
                // Dropping the runtime here cancels every remaining task,
                // which drops (and so closes) every socket they own.
                drop(runtime);
                debug!(reactor = %thread_name, "Reactor stopped");
            })
            .map_err(|e| NetError::Runtime(format!("{}: {e}", constants::ERR_REACTOR_THREAD)))?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Handle used to spawn work onto this reactor
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the event loop and join the thread. Idempotent.
    ///
    /// Must not be called from a task running on this reactor: the join would
    /// wait for the calling thread itself.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Reactor thread panicked");
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}
