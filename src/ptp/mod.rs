//! IEEE 1588-2008/2019 message codec: wire-exact pack/unpack of headers,
//! message bodies and TLVs. Nothing in here understands port state or BMCA;
//! it only turns bytes into structs and back.

mod messages;
mod tlv;
mod types;

pub use messages::{
    AnnounceBody, DelayReqBody, DelayRespBody, FollowUpBody, Message, MessageBody,
    PDelayReqBody, PDelayRespBody, PDelayRespFollowUpBody, SyncBody,
};
pub use tlv::{Tlv, TlvType};
pub use types::{
    ClockAccuracy, ClockIdentity, ClockQuality, ControlField, Header, HeaderFlags, MessageType,
    PortIdentity, TimeSource, Timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    BufferTooShort,
    UnsupportedVersion(u8),
    UnknownMessageType(u8),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::BufferTooShort => write!(f, "buffer too short to decode"),
            CodecError::UnsupportedVersion(v) => write!(f, "unsupported PTP version {v}"),
            CodecError::UnknownMessageType(t) => write!(f, "unknown message type 0x{t:x}"),
        }
    }
}

impl std::error::Error for CodecError {}

pub type Result<T> = std::result::Result<T, CodecError>;
