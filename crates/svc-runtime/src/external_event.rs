//! Self-pipe wakeup event, backed by a loopback TCP socket pair.
//!
//! Grounded directly in the original source's `sockevent` type: a pair of
//! connected sockets plus an atomic "already triggered" flag so repeated
//! triggers before the waiter drains them coalesce into a single byte on
//! the wire. The original opens an `AF_INET6` loopback listener, accepts
//! one connection from a non-blocking client socket, and uses the
//! resulting pair as a readable fd an event loop can poll; this port uses
//! `std::net::{TcpListener, TcpStream}` for the same loopback handshake and
//! a read timeout in place of the original's `poll`/`select` integration.

use std::io::{Read, Write};
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

use svc_core::{ServiceError, ServiceResult};

/// A cross-thread wakeup signal an idle scheduler thread can block on
/// alongside its timer deadline.
pub struct ExternalEvent {
    writer: TcpStream,
    reader: TcpStream,
    triggered: AtomicBool,
}

impl ExternalEvent {
    /// Open the loopback socket pair. Mirrors `sockevent_open`: bind an
    /// ephemeral `::1` listener, connect a client socket to it, accept the
    /// resulting peer, then prime the pipe with one byte so the first
    /// `wait` has something to drain if needed.
    pub fn open() -> ServiceResult<Self> {
        let listener = TcpListener::bind(SocketAddr::V6(SocketAddrV6::new(
            Ipv6Addr::LOCALHOST,
            0,
            0,
            0,
        )))
        .map_err(|e| ServiceError::sockevent_setup(format!("bind: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServiceError::sockevent_setup(format!("local_addr: {e}")))?;

        let writer = TcpStream::connect(addr)
            .map_err(|e| ServiceError::sockevent_setup(format!("connect: {e}")))?;
        let (reader, _) = listener
            .accept()
            .map_err(|e| ServiceError::sockevent_setup(format!("accept: {e}")))?;

        writer
            .set_nodelay(true)
            .map_err(|e| ServiceError::sockevent_setup(format!("set_nodelay: {e}")))?;
        reader
            .set_nodelay(true)
            .map_err(|e| ServiceError::sockevent_setup(format!("set_nodelay: {e}")))?;

        Ok(Self {
            writer,
            reader,
            triggered: AtomicBool::new(false),
        })
    }

    /// Wake the waiter. A no-op if a trigger is already pending and has
    /// not yet been drained by `wait`, matching `sockevent_trigger`'s
    /// `atomic_int_load` short-circuit.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = (&self.writer).write_all(&[0u8]);
    }

    /// Block until triggered or `timeout` elapses, draining any pending
    /// bytes and clearing the triggered flag. Returns `true` if a trigger
    /// was observed, `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let _ = self.reader.set_read_timeout(timeout);
        let mut buf = [0u8; 128];
        let mut reader = &self.reader;
        let woke = match reader.read(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => false,
            Err(_) => false,
        };
        self.triggered.store(false, Ordering::Release);
        woke
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// The readable end's raw descriptor (a host-pollable wake-up fd), for a host
    /// that wants to fold this event into its own `poll`/`epoll`/`kqueue`
    /// loop instead of calling [`Self::wait`].
    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn trigger_then_wait_wakes_immediately() {
        let event = ExternalEvent::open().unwrap();
        event.trigger();
        let woke = event.wait(Some(Duration::from_millis(100)));
        assert!(woke);
    }

    #[test]
    fn wait_times_out_without_trigger() {
        let event = ExternalEvent::open().unwrap();
        let woke = event.wait(Some(Duration::from_millis(30)));
        assert!(!woke);
    }

    #[test]
    fn repeated_trigger_before_drain_coalesces() {
        let event = ExternalEvent::open().unwrap();
        event.trigger();
        event.trigger();
        event.trigger();
        assert!(event.wait(Some(Duration::from_millis(100))));
        // second wait should time out: only one byte was ever queued
        assert!(!event.wait(Some(Duration::from_millis(30))));
    }

    #[test]
    fn cross_thread_wakeup() {
        let event = Arc::new(ExternalEvent::open().unwrap());
        let waiter = Arc::clone(&event);
        let handle = thread::spawn(move || waiter.wait(Some(Duration::from_secs(2))));

        thread::sleep(Duration::from_millis(20));
        event.trigger();

        assert!(handle.join().unwrap());
    }
}
