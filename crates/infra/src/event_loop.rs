//! Serializing event worker
//!
//! IPC, PnP and Bluetooth callbacks arrive on many threads. They submit
//! [`PolicyEvent`]s through a [`PolicyHandle`]; a single worker thread
//! applies them to the orchestrator in arrival order.

use conductor_core::domain::{DeviceFetchOrchestrator, PolicyError, PolicyEvent};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum EventLoopError {
    #[error("Policy event loop has stopped")]
    Stopped,

    #[error("Failed to spawn policy worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

pub type Result<T> = std::result::Result<T, EventLoopError>;

type Reply = Sender<std::result::Result<(), PolicyError>>;

enum Command {
    Event(PolicyEvent, Option<Reply>),
    /// Answered once every earlier command has been handled
    Flush(Sender<()>),
    Shutdown,
}

pub struct PolicyEventLoop;

impl PolicyEventLoop {
    /// Start the worker thread. The orchestrator is shut down when the
    /// loop exits.
    pub fn spawn(orchestrator: Arc<DeviceFetchOrchestrator>) -> Result<PolicyHandle> {
        let (sender, receiver) = unbounded();
        let worker = thread::Builder::new()
            .name("conductor-policy".to_string())
            .spawn(move || run(orchestrator, receiver))?;

        info!("Policy event loop started");
        Ok(PolicyHandle {
            sender,
            worker: Some(worker),
        })
    }
}

fn run(orchestrator: Arc<DeviceFetchOrchestrator>, receiver: Receiver<Command>) {
    for command in receiver.iter() {
        match command {
            Command::Event(event, reply) => {
                let name = event.name();
                let result = orchestrator.handle_event(event);
                if let Err(e) = &result {
                    warn!(event = name, error = %e, "Policy event failed");
                }
                if let Some(reply) = reply {
                    // The caller may have given up waiting
                    let _ = reply.send(result);
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Shutdown => break,
        }
    }

    orchestrator.shutdown();
    debug!("Policy event loop exited");
}

/// Submission side of the event loop
pub struct PolicyHandle {
    sender: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl PolicyHandle {
    /// Queue an event without waiting for it
    pub fn submit(&self, event: PolicyEvent) -> Result<()> {
        self.sender
            .send(Command::Event(event, None))
            .map_err(|_| EventLoopError::Stopped)
    }

    /// Queue an event and wait for the orchestrator's answer
    pub fn call(&self, event: PolicyEvent) -> Result<()> {
        let (reply, answer) = bounded(1);
        self.sender
            .send(Command::Event(event, Some(reply)))
            .map_err(|_| EventLoopError::Stopped)?;
        answer.recv().map_err(|_| EventLoopError::Stopped)??;
        Ok(())
    }

    /// Wait until everything queued so far has been handled
    pub fn flush(&self) -> Result<()> {
        let (done, wait) = bounded(1);
        self.sender
            .send(Command::Flush(done))
            .map_err(|_| EventLoopError::Stopped)?;
        wait.recv().map_err(|_| EventLoopError::Stopped)
    }

    /// Stop the worker after the queued events and join it
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Fails only when the worker is already gone
        let _ = self.sender.send(Command::Shutdown);
        if worker.join().is_err() {
            error!("Policy worker panicked");
        }
        info!("Policy event loop stopped");
    }
}

impl Drop for PolicyHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
