//! Reply path into a reactor.
//!
//! Only the reactor thread touches its sockets. Other threads (pool
//! workers, the application) queue `Outbound` commands here and bump the
//! eventfd; the reactor drains the queue on its next iteration.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use netkit_core::error::{NetError, Result};

use crate::notifier::EventFd;

/// Command for the reactor thread.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Write bytes to a connection. For TLS reactors these are cleartext.
    Send { fd: RawFd, bytes: Vec<u8> },
    /// Close a connection from our side.
    Close { fd: RawFd },
}

pub(crate) struct Outbox {
    queue: ArrayQueue<Outbound>,
    notifier: EventFd,
    closed: AtomicBool,
}

impl Outbox {
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            queue: ArrayQueue::new(capacity.max(1)),
            notifier: EventFd::create()?,
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn push(&self, cmd: Outbound) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::NotRunning);
        }
        self.queue.push(cmd).map_err(|_| NetError::QueueFull)?;
        self.notifier
            .notify()
            .map_err(|e| NetError::os("eventfd write", e))
    }

    pub(crate) fn pop(&self) -> Option<Outbound> {
        self.queue.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub(crate) fn notifier(&self) -> &EventFd {
        &self.notifier
    }

    /// Refuse further commands and drop whatever is still queued.
    pub(crate) fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cloneable, thread-safe handle for talking to a running reactor.
///
/// Commands for descriptors the reactor no longer owns are logged and
/// dropped. Descriptor numbers are reused by the kernel, so a late `send`
/// to a closed fd can land on a newer connection with the same number.
#[derive(Clone)]
pub struct ReactorHandle {
    outbox: Arc<Outbox>,
}

impl ReactorHandle {
    pub(crate) fn new(outbox: Arc<Outbox>) -> Self {
        Self { outbox }
    }

    /// Queue `bytes` for `fd`.
    ///
    /// Fails with `QueueFull` when the outbox is at capacity and with
    /// `NotRunning` once the reactor has stopped.
    pub fn send(&self, fd: RawFd, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.outbox.push(Outbound::Send { fd, bytes: bytes.into() })
    }

    /// Ask the reactor to close `fd`. TLS reactors send close_notify first.
    pub fn close(&self, fd: RawFd) -> Result<()> {
        self.outbox.push(Outbound::Close { fd })
    }

    /// Interrupt the reactor's wait without queueing anything.
    pub fn wake(&self) -> Result<()> {
        self.outbox
            .notifier()
            .notify()
            .map_err(|e| NetError::os("eventfd write", e))
    }

    pub fn is_running(&self) -> bool {
        !self.outbox.is_closed()
    }

    /// Commands queued but not yet taken by the reactor.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("pending", &self.outbox.len())
            .field("capacity", &self.outbox.capacity())
            .field("running", &self.is_running())
            .finish()
    }
}
