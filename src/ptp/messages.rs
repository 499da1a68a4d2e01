use super::tlv::Tlv;
use super::types::{ClockIdentity, ClockQuality, Header, MessageType, PortIdentity, Timestamp};
use super::{CodecError, Result};
use byteorder::{BigEndian, ByteOrder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBody {
    pub origin_timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayReqBody {
    pub origin_timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpBody {
    pub precise_origin_timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayRespBody {
    pub receive_timestamp: Timestamp,
    pub requesting_port_identity: PortIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PDelayReqBody {
    pub origin_timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PDelayRespBody {
    pub request_receipt_timestamp: Timestamp,
    pub requesting_port_identity: PortIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PDelayRespFollowUpBody {
    pub response_origin_timestamp: Timestamp,
    pub requesting_port_identity: PortIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceBody {
    pub origin_timestamp: Timestamp,
    pub current_utc_offset: i16,
    pub grandmaster_priority1: u8,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority2: u8,
    pub grandmaster_identity: ClockIdentity,
    pub steps_removed: u16,
    pub time_source: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Sync(SyncBody),
    DelayReq(DelayReqBody),
    FollowUp(FollowUpBody),
    DelayResp(DelayRespBody),
    PDelayReq(PDelayReqBody),
    PDelayResp(PDelayRespBody),
    PDelayRespFollowUp(PDelayRespFollowUpBody),
    Announce(AnnounceBody),
}

/// A fully decoded message: header, body and any trailing TLVs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub body: MessageBody,
    pub tlvs: Vec<Tlv>,
}

impl Message {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = Header::read(buf)?;
        let body_buf = &buf[Header::WIRE_SIZE..];

        let (body, body_len) = match header.message_type {
            MessageType::Sync => {
                let ts = Timestamp::read(body_buf)?;
                (MessageBody::Sync(SyncBody { origin_timestamp: ts }), 10)
            }
            MessageType::DelayReq => {
                let ts = Timestamp::read(body_buf)?;
                (
                    MessageBody::DelayReq(DelayReqBody { origin_timestamp: ts }),
                    10,
                )
            }
            MessageType::FollowUp => {
                let ts = Timestamp::read(body_buf)?;
                (
                    MessageBody::FollowUp(FollowUpBody {
                        precise_origin_timestamp: ts,
                    }),
                    10,
                )
            }
            MessageType::DelayResp => {
                if body_buf.len() < 20 {
                    return Err(CodecError::BufferTooShort);
                }
                let receive_timestamp = Timestamp::read(&body_buf[0..10])?;
                let requesting_port_identity = PortIdentity::read(&body_buf[10..20])?;
                (
                    MessageBody::DelayResp(DelayRespBody {
                        receive_timestamp,
                        requesting_port_identity,
                    }),
                    20,
                )
            }
            MessageType::PDelayReq => {
                let ts = Timestamp::read(body_buf)?;
                // 10 bytes timestamp + 10 reserved octets.
                (
                    MessageBody::PDelayReq(PDelayReqBody { origin_timestamp: ts }),
                    20,
                )
            }
            MessageType::PDelayResp => {
                if body_buf.len() < 20 {
                    return Err(CodecError::BufferTooShort);
                }
                let request_receipt_timestamp = Timestamp::read(&body_buf[0..10])?;
                let requesting_port_identity = PortIdentity::read(&body_buf[10..20])?;
                (
                    MessageBody::PDelayResp(PDelayRespBody {
                        request_receipt_timestamp,
                        requesting_port_identity,
                    }),
                    20,
                )
            }
            MessageType::PDelayRespFollowUp => {
                if body_buf.len() < 20 {
                    return Err(CodecError::BufferTooShort);
                }
                let response_origin_timestamp = Timestamp::read(&body_buf[0..10])?;
                let requesting_port_identity = PortIdentity::read(&body_buf[10..20])?;
                (
                    MessageBody::PDelayRespFollowUp(PDelayRespFollowUpBody {
                        response_origin_timestamp,
                        requesting_port_identity,
                    }),
                    20,
                )
            }
            MessageType::Announce => {
                if body_buf.len() < 30 {
                    return Err(CodecError::BufferTooShort);
                }
                let origin_timestamp = Timestamp::read(&body_buf[0..10])?;
                let current_utc_offset = BigEndian::read_i16(&body_buf[10..12]);
                let grandmaster_priority1 = body_buf[13];
                let grandmaster_clock_quality = ClockQuality::read(&body_buf[14..18])?;
                let grandmaster_priority2 = body_buf[18];
                let grandmaster_identity = ClockIdentity::read(&body_buf[19..27])?;
                let steps_removed = BigEndian::read_u16(&body_buf[27..29]);
                let time_source = body_buf[29];
                (
                    MessageBody::Announce(AnnounceBody {
                        origin_timestamp,
                        current_utc_offset,
                        grandmaster_priority1,
                        grandmaster_clock_quality,
                        grandmaster_priority2,
                        grandmaster_identity,
                        steps_removed,
                        time_source,
                    }),
                    30,
                )
            }
            MessageType::Signaling | MessageType::Management => {
                return Err(CodecError::UnknownMessageType(header.message_type as u8))
            }
        };

        let tlv_buf = &body_buf[body_len..];
        let tlvs = Tlv::parse_all(tlv_buf)?;

        Ok(Message { header, body, tlvs })
    }

    /// Encode into `buf`, returning the number of bytes written. `buf` must
    /// be at least as large as the header plus the body (TLVs, if any, are
    /// appended by the caller via `Tlv::write`).
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.header.write(buf)?;
        let body_buf = &mut buf[Header::WIRE_SIZE..];

        let body_len = match &self.body {
            MessageBody::Sync(b) => {
                b.origin_timestamp.write(body_buf)?;
                10
            }
            MessageBody::DelayReq(b) => {
                b.origin_timestamp.write(body_buf)?;
                10
            }
            MessageBody::FollowUp(b) => {
                b.precise_origin_timestamp.write(body_buf)?;
                10
            }
            MessageBody::DelayResp(b) => {
                if body_buf.len() < 20 {
                    return Err(CodecError::BufferTooShort);
                }
                b.receive_timestamp.write(&mut body_buf[0..10])?;
                b.requesting_port_identity.write(&mut body_buf[10..20])?;
                20
            }
            MessageBody::PDelayReq(b) => {
                if body_buf.len() < 20 {
                    return Err(CodecError::BufferTooShort);
                }
                b.origin_timestamp.write(&mut body_buf[0..10])?;
                body_buf[10..20].copy_from_slice(&[0u8; 10]);
                20
            }
            MessageBody::PDelayResp(b) => {
                if body_buf.len() < 20 {
                    return Err(CodecError::BufferTooShort);
                }
                b.request_receipt_timestamp.write(&mut body_buf[0..10])?;
                b.requesting_port_identity.write(&mut body_buf[10..20])?;
                20
            }
            MessageBody::PDelayRespFollowUp(b) => {
                if body_buf.len() < 20 {
                    return Err(CodecError::BufferTooShort);
                }
                b.response_origin_timestamp.write(&mut body_buf[0..10])?;
                b.requesting_port_identity.write(&mut body_buf[10..20])?;
                20
            }
            MessageBody::Announce(b) => {
                if body_buf.len() < 30 {
                    return Err(CodecError::BufferTooShort);
                }
                b.origin_timestamp.write(&mut body_buf[0..10])?;
                BigEndian::write_i16(&mut body_buf[10..12], b.current_utc_offset);
                body_buf[12] = 0;
                body_buf[13] = b.grandmaster_priority1;
                b.grandmaster_clock_quality.write(&mut body_buf[14..18])?;
                body_buf[18] = b.grandmaster_priority2;
                b.grandmaster_identity.write(&mut body_buf[19..27])?;
                BigEndian::write_u16(&mut body_buf[27..29], b.steps_removed);
                body_buf[29] = b.time_source;
                30
            }
        };

        let mut written = Header::WIRE_SIZE + body_len;
        let tlv_buf = &mut buf[written..];
        written += Tlv::write_all(&self.tlvs, tlv_buf)?;
        Ok(written)
    }
}
