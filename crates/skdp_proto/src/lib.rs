//! skdp_proto — the Symmetric Key Distribution Protocol.
//!
//! A hierarchical pre-shared-key protocol between a device and a server:
//! a four-message key exchange authenticates both parties against the key
//! hierarchy, derives a fresh session-key pair, and runs an authenticated,
//! sequence-tracked tunnel with periodic keep-alive.
//!
//! # Module layout
//! - `config`    — deployment-fixed constants and the configuration string
//! - `packet`    — 21-byte header framing, UTC stamping, validity window
//! - `transport` — blocking byte-exact transport seam (TCP + in-memory)
//! - `rng`       — randomness capability owned per session
//! - `channel`   — shared endpoint core and the post-exchange tunnel
//! - `device`    — device role: connect / exchange / establish requests
//! - `server`    — server role: the mirrored responses and the listener
//! - `keepalive` — liveness probes and timeout detection
//! - `error`     — error taxonomy with stable wire codes

pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod keepalive;
pub mod packet;
pub mod rng;
pub mod server;
pub mod transport;

pub use channel::{KexStage, SessionEvent};
pub use device::DeviceSession;
pub use error::SkdpError;
pub use server::ServerSession;
