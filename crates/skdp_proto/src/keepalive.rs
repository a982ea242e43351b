//! Keep-alive sub-protocol.
//!
//! Either side may probe. The probe body is the sender's epoch time; the
//! peer echoes counter and body verbatim. The counter advances only when a
//! matching answer arrives, and a probe left unanswered past the timeout
//! marks the link dead.

use crate::config::{KEEPALIVE_MESSAGE_SIZE, KEEPALIVE_TIMEOUT};
use crate::error::SkdpError;
use crate::packet::{now_utc_seconds, Packet, PacketFlag};
use crate::transport::Transport;

#[derive(Debug)]
pub struct KeepAliveState {
    /// Epoch seconds at the last probe sent.
    pub etime: u64,
    /// Probe counter; carried as the packet sequence.
    pub seqctr: u64,
    /// Whether the outstanding probe has been answered.
    pub recd: bool,
}

impl Default for KeepAliveState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepAliveState {
    pub fn new() -> Self {
        Self {
            etime: 0,
            seqctr: 0,
            recd: true,
        }
    }

    /// Build the next probe and record the send time.
    pub fn request(&mut self, now: u64) -> Packet {
        self.etime = now;
        self.recd = false;
        Packet::new(
            PacketFlag::KeepAliveRequest,
            self.seqctr,
            now.to_le_bytes().to_vec(),
        )
    }

    /// Build and transmit the next probe over the link.
    pub fn send_keep_alive<T: Transport>(&mut self, transport: &mut T) -> Result<(), SkdpError> {
        if !transport.is_open() {
            return Err(SkdpError::BadKeepAlive);
        }
        let packet = self.request(now_utc_seconds());
        transport
            .send_all(&packet.to_bytes())
            .map_err(|_| SkdpError::BadKeepAlive)
    }

    /// Echo a peer probe: same counter, same body.
    pub fn response_for(request: &Packet) -> Result<Packet, SkdpError> {
        if request.header.flag != PacketFlag::KeepAliveRequest
            || request.body.len() != KEEPALIVE_MESSAGE_SIZE
        {
            return Err(SkdpError::BadKeepAlive);
        }
        Ok(Packet::new(
            PacketFlag::KeepAliveResponse,
            request.header.sequence,
            request.body.clone(),
        ))
    }

    /// Verify a peer answer to the outstanding probe.
    pub fn verify_response(&mut self, response: &Packet, now: u64) -> Result<(), SkdpError> {
        if response.header.flag != PacketFlag::KeepAliveResponse
            || response.body.len() != KEEPALIVE_MESSAGE_SIZE
            || response.header.sequence != self.seqctr
        {
            return Err(SkdpError::BadKeepAlive);
        }
        let echoed = u64::from_le_bytes(response.body[..8].try_into().expect("length checked"));
        if echoed != self.etime || now.saturating_sub(self.etime) > KEEPALIVE_TIMEOUT {
            return Err(SkdpError::BadKeepAlive);
        }
        self.recd = true;
        self.seqctr += 1;
        Ok(())
    }

    /// Whether the outstanding probe has gone unanswered past the timeout.
    pub fn expired(&self, now: u64) -> bool {
        !self.recd && now.saturating_sub(self.etime) > KEEPALIVE_TIMEOUT
    }
}
