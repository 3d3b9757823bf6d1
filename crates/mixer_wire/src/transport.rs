//! Command transport
//!
//! The session only sees the `Transport` trait. `ChannelTransport` connects
//! two endpoints in-process with crossbeam channels; a socket-backed
//! transport would run its I/O on a background thread that owns one end.

use crate::message::Command;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The other end is gone
    #[error("Transport disconnected")]
    Disconnected,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Traffic counters of one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub commands_sent: u64,
    pub commands_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Ordered, reliable delivery of commands
pub trait Transport: Send {
    fn send(&mut self, command: Command) -> TransportResult<()>;

    /// Next command if one is waiting
    fn try_recv(&mut self) -> TransportResult<Option<Command>>;

    /// Next command, waiting at most `timeout`
    fn recv_timeout(&mut self, timeout: Duration) -> TransportResult<Option<Command>>;

    fn is_connected(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

/// One end of an in-process command channel
#[derive(Debug)]
pub struct ChannelTransport {
    sender: Sender<Command>,
    receiver: Receiver<Command>,
    stats: Arc<Mutex<TransportStats>>,
    connected: bool,
}

impl ChannelTransport {
    /// Two connected endpoints
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    pub fn new(sender: Sender<Command>, receiver: Receiver<Command>) -> Self {
        Self {
            sender,
            receiver,
            stats: Arc::new(Mutex::new(TransportStats::default())),
            connected: true,
        }
    }

    /// Shared counters, readable from another thread
    pub fn stats_handle(&self) -> Arc<Mutex<TransportStats>> {
        Arc::clone(&self.stats)
    }

    fn received(&self, command: Command) -> Option<Command> {
        let mut stats = self.stats.lock();
        stats.commands_received += 1;
        stats.bytes_received += command.payload.len() as u64;
        Some(command)
    }

    fn disconnected<T>(&mut self) -> TransportResult<T> {
        if self.connected {
            log::info!("Transport peer disconnected");
        }
        self.connected = false;
        Err(TransportError::Disconnected)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, command: Command) -> TransportResult<()> {
        let size = command.payload.len() as u64;
        if self.sender.send(command).is_err() {
            return self.disconnected();
        }
        let mut stats = self.stats.lock();
        stats.commands_sent += 1;
        stats.bytes_sent += size;
        Ok(())
    }

    fn try_recv(&mut self) -> TransportResult<Option<Command>> {
        match self.receiver.try_recv() {
            Ok(command) => Ok(self.received(command)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => self.disconnected(),
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> TransportResult<Option<Command>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(command) => Ok(self.received(command)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => self.disconnected(),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> TransportStats {
        self.stats.lock().clone()
    }
}
