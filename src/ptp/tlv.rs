use super::{CodecError, Result};
use byteorder::{BigEndian, ByteOrder};

/// TLV type field (IEEE 1588-2008 Table 34, plus the organization-specific
/// extension this daemon recognizes for hybrid unicast/multicast fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    Management,
    ManagementErrorStatus,
    OrganizationExtension,
    RequestUnicastTransmission,
    GrantUnicastTransmission,
    CancelUnicastTransmission,
    AcknowledgeCancelUnicastTransmission,
    PathTrace,
    AlternateTimeOffsetIndicator,
    PortCommunicationCapabilities,
    Unknown(u16),
}

impl TlvType {
    pub fn from_u16(v: u16) -> Self {
        match v {
            0x0001 => TlvType::Management,
            0x0002 => TlvType::ManagementErrorStatus,
            0x0003 => TlvType::OrganizationExtension,
            0x0004 => TlvType::RequestUnicastTransmission,
            0x0005 => TlvType::GrantUnicastTransmission,
            0x0006 => TlvType::CancelUnicastTransmission,
            0x0007 => TlvType::AcknowledgeCancelUnicastTransmission,
            0x0008 => TlvType::PathTrace,
            0x0009 => TlvType::AlternateTimeOffsetIndicator,
            0x8002 => TlvType::PortCommunicationCapabilities,
            other => TlvType::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            TlvType::Management => 0x0001,
            TlvType::ManagementErrorStatus => 0x0002,
            TlvType::OrganizationExtension => 0x0003,
            TlvType::RequestUnicastTransmission => 0x0004,
            TlvType::GrantUnicastTransmission => 0x0005,
            TlvType::CancelUnicastTransmission => 0x0006,
            TlvType::AcknowledgeCancelUnicastTransmission => 0x0007,
            TlvType::PathTrace => 0x0008,
            TlvType::AlternateTimeOffsetIndicator => 0x0009,
            TlvType::PortCommunicationCapabilities => 0x8002,
            TlvType::Unknown(v) => v,
        }
    }
}

/// A single parsed TLV: type plus its raw value bytes. Unknown types are
/// preserved uninterpreted (counted-and-skipped) rather than dropped, so a
/// message can be re-encoded without losing extensions this daemon doesn't
/// understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tlv_type: TlvType,
    pub value: Vec<u8>,
}

impl Tlv {
    /// Parse every TLV from a trailing buffer until it is exhausted.
    /// Follows IEEE 1588's two-pass model at the message-handling layer:
    /// this function only performs the syntactic pass (split into typed
    /// byte ranges); semantic pass-1 (capability TLVs that affect how the
    /// rest of the message is interpreted) and pass-2 (side effects) are
    /// the port engine's job once it has this `Vec`.
    pub fn parse_all(mut buf: &[u8]) -> Result<Vec<Tlv>> {
        let mut tlvs = Vec::new();
        while buf.len() >= 4 {
            let tlv_type = TlvType::from_u16(BigEndian::read_u16(&buf[0..2]));
            let length = BigEndian::read_u16(&buf[2..4]) as usize;
            if buf.len() < 4 + length {
                return Err(CodecError::BufferTooShort);
            }
            let value = buf[4..4 + length].to_vec();
            tlvs.push(Tlv { tlv_type, value });
            buf = &buf[4 + length..];
        }
        Ok(tlvs)
    }

    pub fn write_all(tlvs: &[Tlv], mut buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        for tlv in tlvs {
            let total = 4 + tlv.value.len();
            if buf.len() < total {
                return Err(CodecError::BufferTooShort);
            }
            BigEndian::write_u16(&mut buf[0..2], tlv.tlv_type.to_u16());
            BigEndian::write_u16(&mut buf[2..4], tlv.value.len() as u16);
            buf[4..total].copy_from_slice(&tlv.value);
            buf = &mut buf[total..];
            written += total;
        }
        Ok(written)
    }

    /// Decode a `PortCommunicationCapabilities` TLV's payload: a single
    /// octet bitmask of which transports (unicast event/general, multicast
    /// event/general) the sender supports, driving the hybrid delay
    /// mechanism's fallback decision in the port engine.
    pub fn port_communication_capabilities(&self) -> Option<u8> {
        if self.tlv_type == TlvType::PortCommunicationCapabilities && !self.value.is_empty() {
            Some(self.value[0])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_tlv() {
        let tlvs = vec![Tlv {
            tlv_type: TlvType::PathTrace,
            value: vec![1, 2, 3, 4, 5, 6, 7, 8],
        }];
        let mut buf = [0u8; 32];
        let len = Tlv::write_all(&tlvs, &mut buf).unwrap();
        let parsed = Tlv::parse_all(&buf[..len]).unwrap();
        assert_eq!(parsed, tlvs);
    }

    #[test]
    fn unknown_type_is_preserved() {
        let tlvs = vec![Tlv {
            tlv_type: TlvType::Unknown(0x1234),
            value: vec![0xAA, 0xBB],
        }];
        let mut buf = [0u8; 16];
        let len = Tlv::write_all(&tlvs, &mut buf).unwrap();
        let parsed = Tlv::parse_all(&buf[..len]).unwrap();
        assert_eq!(parsed[0].tlv_type, TlvType::Unknown(0x1234));
    }

    #[test]
    fn truncated_tlv_is_rejected() {
        let mut buf = [0u8; 4];
        BigEndian::write_u16(&mut buf[0..2], 0x0008);
        BigEndian::write_u16(&mut buf[2..4], 10); // claims 10 bytes of value, has 0
        assert_eq!(Tlv::parse_all(&buf), Err(CodecError::BufferTooShort));
    }

    #[test]
    fn port_communication_capabilities_extracted() {
        let tlv = Tlv {
            tlv_type: TlvType::PortCommunicationCapabilities,
            value: vec![0b0000_0011],
        };
        assert_eq!(tlv.port_communication_capabilities(), Some(0b0000_0011));
    }
}
