use super::{CodecError, Result};
use byteorder::{BigEndian, ByteOrder};

/// 8-octet clock identity (EUI-64 derived, typically from a MAC address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockIdentity(pub [u8; 8]);

impl ClockIdentity {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        // Standard EUI-48 -> EUI-64 expansion (insert 0xFF 0xFE).
        ClockIdentity([mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5]])
    }

    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(CodecError::BufferTooShort);
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[..8]);
        Ok(ClockIdentity(id))
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < 8 {
            return Err(CodecError::BufferTooShort);
        }
        buf[..8].copy_from_slice(&self.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortIdentity {
    pub clock_identity: ClockIdentity,
    pub port_number: u16,
}

impl PortIdentity {
    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < 10 {
            return Err(CodecError::BufferTooShort);
        }
        Ok(PortIdentity {
            clock_identity: ClockIdentity::read(&buf[0..8])?,
            port_number: BigEndian::read_u16(&buf[8..10]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < 10 {
            return Err(CodecError::BufferTooShort);
        }
        self.clock_identity.write(&mut buf[0..8])?;
        BigEndian::write_u16(&mut buf[8..10], self.port_number);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: ClockAccuracy,
    pub offset_scaled_log_variance: u16,
}

impl ClockQuality {
    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(CodecError::BufferTooShort);
        }
        Ok(ClockQuality {
            clock_class: buf[0],
            clock_accuracy: ClockAccuracy(buf[1]),
            offset_scaled_log_variance: BigEndian::read_u16(&buf[2..4]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < 4 {
            return Err(CodecError::BufferTooShort);
        }
        buf[0] = self.clock_class;
        buf[1] = self.clock_accuracy.0;
        BigEndian::write_u16(&mut buf[2..4], self.offset_scaled_log_variance);
        Ok(())
    }
}

/// `clockAccuracy` enumeration; only the sentinel values the engine cares
/// about are named, the rest pass through as their raw octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockAccuracy(pub u8);

impl ClockAccuracy {
    pub const UNKNOWN: ClockAccuracy = ClockAccuracy(0xFE);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    Atomic,
    Gps,
    TerrestrialRadio,
    Ptp,
    Ntp,
    HandSet,
    Other,
    InternalOscillator,
    Unknown(u8),
}

impl TimeSource {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x10 => TimeSource::Atomic,
            0x20 => TimeSource::Gps,
            0x30 => TimeSource::TerrestrialRadio,
            0x40 => TimeSource::Ptp,
            0x50 => TimeSource::Ntp,
            0x60 => TimeSource::HandSet,
            0x90 => TimeSource::Other,
            0xA0 => TimeSource::InternalOscillator,
            other => TimeSource::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            TimeSource::Atomic => 0x10,
            TimeSource::Gps => 0x20,
            TimeSource::TerrestrialRadio => 0x30,
            TimeSource::Ptp => 0x40,
            TimeSource::Ntp => 0x50,
            TimeSource::HandSet => 0x60,
            TimeSource::Other => 0x90,
            TimeSource::InternalOscillator => 0xA0,
            TimeSource::Unknown(v) => v,
        }
    }
}

/// 80-bit PTP timestamp: 48-bit seconds, 32-bit nanoseconds. Converted to a
/// signed nanosecond count for arithmetic; sufficient range for any
/// timestamp this daemon will ever compare (does not attempt to represent
/// dates beyond the `i64` nanosecond epoch horizon).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn from_nanos(ns: i64) -> Self {
        let seconds = ns.div_euclid(1_000_000_000);
        let nanoseconds = ns.rem_euclid(1_000_000_000) as u32;
        Timestamp {
            seconds: seconds as u64,
            nanoseconds,
        }
    }

    pub fn to_nanos(self) -> i64 {
        self.seconds as i64 * 1_000_000_000 + self.nanoseconds as i64
    }

    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < 10 {
            return Err(CodecError::BufferTooShort);
        }
        let mut sec_bytes = [0u8; 8];
        sec_bytes[2..8].copy_from_slice(&buf[0..6]);
        let seconds = BigEndian::read_u64(&sec_bytes);
        let nanoseconds = BigEndian::read_u32(&buf[6..10]);
        Ok(Timestamp {
            seconds,
            nanoseconds,
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < 10 {
            return Err(CodecError::BufferTooShort);
        }
        let mut sec_bytes = [0u8; 8];
        BigEndian::write_u64(&mut sec_bytes, self.seconds);
        buf[0..6].copy_from_slice(&sec_bytes[2..8]);
        BigEndian::write_u32(&mut buf[6..10], self.nanoseconds);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    PDelayReq = 0x2,
    PDelayResp = 0x3,
    FollowUp = 0x8,
    DelayResp = 0x9,
    PDelayRespFollowUp = 0xA,
    Announce = 0xB,
    Signaling = 0xC,
    Management = 0xD,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v & 0x0F {
            0x0 => MessageType::Sync,
            0x1 => MessageType::DelayReq,
            0x2 => MessageType::PDelayReq,
            0x3 => MessageType::PDelayResp,
            0x8 => MessageType::FollowUp,
            0x9 => MessageType::DelayResp,
            0xA => MessageType::PDelayRespFollowUp,
            0xB => MessageType::Announce,
            0xC => MessageType::Signaling,
            0xD => MessageType::Management,
            other => return Err(CodecError::UnknownMessageType(other)),
        })
    }

    pub fn is_event(self) -> bool {
        matches!(
            self,
            MessageType::Sync
                | MessageType::DelayReq
                | MessageType::PDelayReq
                | MessageType::PDelayResp
        )
    }
}

/// Legacy v1-style control field, retained for compatibility with
/// implementations that still populate it (IEEE 1588-2008 §13.3.2.19).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlField {
    Sync = 0,
    DelayReq = 1,
    FollowUp = 2,
    DelayResp = 3,
    Management = 4,
    Other = 5,
}

impl ControlField {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ControlField::Sync,
            1 => ControlField::DelayReq,
            2 => ControlField::FollowUp,
            3 => ControlField::DelayResp,
            4 => ControlField::Management,
            _ => ControlField::Other,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u16 {
        const ALTERNATE_MASTER   = 1 << 0;
        const TWO_STEP           = 1 << 1;
        const UNICAST            = 1 << 2;
        const PTP_PROFILE_SPEC_1 = 1 << 5;
        const PTP_PROFILE_SPEC_2 = 1 << 6;
        const LEAP61             = 1 << 8;
        const LEAP59             = 1 << 9;
        const CURRENT_UTC_VALID  = 1 << 10;
        const PTP_TIMESCALE      = 1 << 11;
        const TIME_TRACEABLE     = 1 << 12;
        const FREQUENCY_TRACEABLE = 1 << 13;
    }
}

/// Common 34-octet PTP header shared by every message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub version: u8,
    pub message_length: u16,
    pub domain_number: u8,
    pub flags: HeaderFlags,
    pub correction_field: i64, // units: 2^-16 ns, see `correction_field_ns`
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub control_field: ControlField,
    pub log_message_interval: i8,
}

impl Header {
    pub const WIRE_SIZE: usize = 34;

    /// Correction field converted to whole nanoseconds (sub-nanosecond
    /// fraction truncated; this daemon does not track fractional ns).
    pub fn correction_field_ns(&self) -> i64 {
        self.correction_field >> 16
    }

    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(CodecError::BufferTooShort);
        }
        let message_type = MessageType::from_u8(buf[0])?;
        let version = buf[1] & 0x0F;
        let message_length = BigEndian::read_u16(&buf[2..4]);
        let domain_number = buf[4];
        let flags = HeaderFlags::from_bits_truncate(BigEndian::read_u16(&buf[6..8]));
        let correction_field = BigEndian::read_i64(&buf[8..16]);
        let source_port_identity = PortIdentity::read(&buf[20..30])?;
        let sequence_id = BigEndian::read_u16(&buf[30..32]);
        let control_field = ControlField::from_u8(buf[32]);
        let log_message_interval = buf[33] as i8;
        Ok(Header {
            message_type,
            version,
            message_length,
            domain_number,
            flags,
            correction_field,
            source_port_identity,
            sequence_id,
            control_field,
            log_message_interval,
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(CodecError::BufferTooShort);
        }
        buf[0] = self.message_type as u8;
        buf[1] = (self.version & 0x0F) | 0x10; // minorVersionNumber nibble unused, 1 reserved
        BigEndian::write_u16(&mut buf[2..4], self.message_length);
        buf[4] = self.domain_number;
        buf[5] = 0;
        BigEndian::write_u16(&mut buf[6..8], self.flags.bits());
        BigEndian::write_i64(&mut buf[8..16], self.correction_field);
        buf[16..20].copy_from_slice(&[0, 0, 0, 0]);
        self.source_port_identity.write(&mut buf[20..30])?;
        BigEndian::write_u16(&mut buf[30..32], self.sequence_id);
        buf[32] = self.control_field as u8;
        buf[33] = self.log_message_interval as u8;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            message_type: MessageType::Sync,
            version: 2,
            message_length: 44,
            domain_number: 0,
            flags: HeaderFlags::TWO_STEP | HeaderFlags::PTP_TIMESCALE,
            correction_field: 12345,
            source_port_identity: PortIdentity {
                clock_identity: ClockIdentity::from_mac([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
                port_number: 1,
            },
            sequence_id: 42,
            control_field: ControlField::Sync,
            log_message_interval: 0,
        }
    }

    #[test]
    fn header_round_trips() {
        let header = sample_header();
        let mut buf = [0u8; Header::WIRE_SIZE];
        header.write(&mut buf).unwrap();
        let parsed = Header::read(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_rejects_short_buffer() {
        let header = sample_header();
        let mut buf = [0u8; 10];
        assert_eq!(header.write(&mut buf), Err(CodecError::BufferTooShort));
        assert_eq!(Header::read(&buf[..10]), Err(CodecError::BufferTooShort));
    }

    #[test]
    fn timestamp_round_trips() {
        let ts = Timestamp {
            seconds: 1_700_000_000,
            nanoseconds: 123_456_789,
        };
        let mut buf = [0u8; 10];
        ts.write(&mut buf).unwrap();
        assert_eq!(Timestamp::read(&buf).unwrap(), ts);
    }

    #[test]
    fn timestamp_nanos_round_trip() {
        let ns = 1_700_000_000_123_456_789i64;
        let ts = Timestamp::from_nanos(ns);
        assert_eq!(ts.to_nanos(), ns);
    }

    #[test]
    fn clock_identity_from_mac_inserts_ffe() {
        let id = ClockIdentity::from_mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(id.0, [0xAA, 0xBB, 0xCC, 0xFF, 0xFE, 0xDD, 0xEE, 0xFF]);
    }
}
