//! Protocol error taxonomy.
//!
//! Every variant has a stable one-byte wire code; `error_condition` and
//! `connection_terminate` packets carry it as their body. Codes map both
//! ways so a peer-signaled error surfaces as the same variant locally.

use thiserror::Error;

use skdp_crypto::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkdpError {
    #[error("general failure")]
    GeneralFailure,

    #[error("the key identity is not recognized by the host")]
    KeyNotRecognized,

    #[error("the configuration string does not match the host")]
    UnknownProtocol,

    #[error("the random generator failed")]
    RandomFailure,

    #[error("the exchange mac tag could not be verified")]
    KexAuthFailure,

    #[error("the cipher failed to authenticate the message")]
    CipherAuthFailure,

    #[error("the packet is outside the valid-time window")]
    PacketExpired,

    #[error("the packet was received out of sequence")]
    Unsequenced,

    #[error("the secure channel is not established")]
    ChannelDown,

    #[error("the packet could not be transmitted")]
    TransmitFailure,

    #[error("the packet could not be received")]
    ReceiveFailure,

    #[error("the connection attempt failed")]
    ConnectionFailure,

    #[error("the session could not be established")]
    EstablishFailure,

    #[error("the keep-alive check failed")]
    BadKeepAlive,

    #[error("the input is invalid")]
    InvalidInput,
}

impl SkdpError {
    /// The stable byte carried on the wire. Zero is reserved for "none".
    pub fn to_wire(self) -> u8 {
        match self {
            Self::GeneralFailure => 0x01,
            Self::KeyNotRecognized => 0x02,
            Self::UnknownProtocol => 0x03,
            Self::RandomFailure => 0x04,
            Self::KexAuthFailure => 0x05,
            Self::CipherAuthFailure => 0x06,
            Self::PacketExpired => 0x07,
            Self::Unsequenced => 0x08,
            Self::ChannelDown => 0x09,
            Self::TransmitFailure => 0x0A,
            Self::ReceiveFailure => 0x0B,
            Self::ConnectionFailure => 0x0C,
            Self::EstablishFailure => 0x0D,
            Self::BadKeepAlive => 0x0E,
            Self::InvalidInput => 0x0F,
        }
    }

    /// Map a received code; unknown codes collapse to `GeneralFailure`.
    pub fn from_wire(code: u8) -> Self {
        match code {
            0x01 => Self::GeneralFailure,
            0x02 => Self::KeyNotRecognized,
            0x03 => Self::UnknownProtocol,
            0x04 => Self::RandomFailure,
            0x05 => Self::KexAuthFailure,
            0x06 => Self::CipherAuthFailure,
            0x07 => Self::PacketExpired,
            0x08 => Self::Unsequenced,
            0x09 => Self::ChannelDown,
            0x0A => Self::TransmitFailure,
            0x0B => Self::ReceiveFailure,
            0x0C => Self::ConnectionFailure,
            0x0D => Self::EstablishFailure,
            0x0E => Self::BadKeepAlive,
            0x0F => Self::InvalidInput,
            _ => Self::GeneralFailure,
        }
    }

    /// Whether the session must be disposed after this error. Only the
    /// caller-recoverable checks leave the state usable.
    pub fn is_session_fatal(self) -> bool {
        !matches!(self, Self::InvalidInput | Self::BadKeepAlive)
    }
}

impl From<CryptoError> for SkdpError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AeadDecrypt => Self::CipherAuthFailure,
            CryptoError::AeadEncrypt => Self::GeneralFailure,
            CryptoError::RandomFailure => Self::RandomFailure,
            CryptoError::InvalidKey(_)
            | CryptoError::MalformedRecord(_)
            | CryptoError::Serialisation(_) => Self::InvalidInput,
        }
    }
}
