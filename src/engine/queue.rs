// Copyright 2024-2026 memstore Contributors
// Licensed under the Apache License, Version 2.0

//! In-order device command queue.
//!
//! Copy commands run on a dedicated worker thread. Enqueueing returns a
//! [`CopyEvent`]; callers that need the result block on [`CopyEvent::wait`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::memory::Buffer;

/// A command to be executed by the queue worker.
type Command = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle of an enqueued copy.
#[must_use = "a copy is only complete once its event has been waited on"]
pub struct CopyEvent<T> {
    done: Receiver<Result<T, StorageError>>,
}

impl<T> CopyEvent<T> {
    /// Block until the command has run and return its result.
    pub fn wait(self) -> Result<T, StorageError> {
        self.done.recv().map_err(|_| {
            StorageError::DeviceFailure("command queue dropped the copy before completion".into())
        })?
    }
}

/// In-order command queue backed by one worker thread.
#[derive(Debug)]
pub struct CommandQueue {
    name: String,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    completed: Arc<AtomicU64>,
}

impl CommandQueue {
    /// Spawn the worker thread.
    pub fn new(name: &str) -> Result<Self, StorageError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(command) = receiver.recv() {
                    command();
                }
            })
            .map_err(|e| StorageError::DeviceFailure(format!("failed to start queue worker: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            completed: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of commands the worker has finished.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Enqueue a host-to-device copy of `data` into `buffer` at `offset`.
    pub fn enqueue_write(
        &self,
        buffer: Buffer,
        offset: usize,
        data: Vec<u8>,
    ) -> Result<CopyEvent<()>, StorageError> {
        self.submit(move || buffer.write_bytes(offset, &data))
    }

    /// Enqueue a device-to-host copy of `len` bytes from `buffer` at `offset`.
    pub fn enqueue_read(
        &self,
        buffer: Buffer,
        offset: usize,
        len: usize,
    ) -> Result<CopyEvent<Vec<u8>>, StorageError> {
        self.submit(move || buffer.read_bytes(offset, len))
    }

    fn submit<T, F>(&self, op: F) -> Result<CopyEvent<T>, StorageError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let completed = self.completed.clone();
        let command: Command = Box::new(move || {
            let result = op();
            // Counted before signaling so a waiter observes its own command.
            completed.fetch_add(1, Ordering::Release);
            // Receiver gone means the caller abandoned the event.
            let _ = done_tx.send(result);
        });

        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| StorageError::DeviceFailure(format!("queue '{}' is shut down", self.name)))?;
        sender
            .send(command)
            .map_err(|_| StorageError::DeviceFailure(format!("queue '{}' worker exited", self.name)))?;

        Ok(CopyEvent { done: done_rx })
    }

    /// Drain pending commands and stop the worker. Later enqueues fail.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!(queue = %self.name, "queue worker panicked");
            }
        }
        debug!(queue = %self.name, completed = self.completed(), "command queue shut down");
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
