//! Blocking byte-exact transport seam.
//!
//! The exchange reads fixed-size packets, so the contract is exactly two
//! blocking calls plus close. TCP satisfies it through `read_exact`; tests
//! and embedders without sockets use the in-memory pair.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::error::SkdpError;

pub trait Transport {
    /// Write the whole buffer or fail.
    fn send_all(&mut self, bytes: &[u8]) -> Result<(), SkdpError>;

    /// Block until exactly `buf.len()` bytes have arrived.
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), SkdpError>;

    /// Shut the link down; later calls fail.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// TCP-backed transport.
pub struct TcpTransport {
    stream: TcpStream,
    open: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream, open: true }
    }
}

impl Transport for TcpTransport {
    fn send_all(&mut self, bytes: &[u8]) -> Result<(), SkdpError> {
        if !self.open {
            return Err(SkdpError::TransmitFailure);
        }
        self.stream
            .write_all(bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|_| SkdpError::TransmitFailure)
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), SkdpError> {
        if !self.open {
            return Err(SkdpError::ReceiveFailure);
        }
        self.stream
            .read_exact(buf)
            .map_err(|_| SkdpError::ReceiveFailure)
    }

    fn close(&mut self) {
        if self.open {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// One end of an in-memory duplex link.
pub struct MemoryTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    open: bool,
}

impl MemoryTransport {
    /// A connected pair; bytes written to one end are read from the other.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (atx, brx) = channel();
        let (btx, arx) = channel();
        (
            MemoryTransport {
                tx: atx,
                rx: arx,
                pending: Vec::new(),
                open: true,
            },
            MemoryTransport {
                tx: btx,
                rx: brx,
                pending: Vec::new(),
                open: true,
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn send_all(&mut self, bytes: &[u8]) -> Result<(), SkdpError> {
        if !self.open {
            return Err(SkdpError::TransmitFailure);
        }
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| SkdpError::TransmitFailure)
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), SkdpError> {
        if !self.open {
            return Err(SkdpError::ReceiveFailure);
        }
        while self.pending.len() < buf.len() {
            let chunk = self.rx.recv().map_err(|_| SkdpError::ReceiveFailure)?;
            self.pending.extend_from_slice(&chunk);
        }
        buf.copy_from_slice(&self.pending[..buf.len()]);
        self.pending.drain(..buf.len());
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
