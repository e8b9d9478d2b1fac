//! Cisco NetFlow v5 wire format: 24-byte header followed by up to 30
//! 48-byte flow records, all multi-byte fields big-endian.
//!
//! <https://www.cisco.com/c/en/us/td/docs/net_mgmt/netflow_collection_engine/3-6/user/guide/format.html>

use core::convert::TryInto;

use crate::error::DecodeError;

pub const VERSION: u16 = 5;
pub const MAX_RECORDS: usize = 30;
pub const MAX_DATAGRAM_SIZE: usize = Header::SIZE + Record::SIZE * MAX_RECORDS;

/// NetFlow v5 message header.
#[derive(Debug)]
pub struct Header {
    pub version: u16,
    pub count: u16,
    pub uptime: u32,
    pub unix_secs: u32,
    pub unix_nsecs: u32,
    pub flow_sequence: u32,
    pub engine_type: u8,
    pub engine_id: u8,
}

impl Header {
    pub const SIZE: usize = 24;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::ShortHeader {
                len: buf.len(),
                header_len: Self::SIZE,
            });
        }

        Ok(Header {
            version: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            count: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            uptime: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            unix_secs: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            unix_nsecs: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            flow_sequence: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            engine_type: buf[20],
            engine_id: buf[21],
            // buf[22..24] is the sampling mode/interval field, unused here
        })
    }
}

/// A single 48-byte flow record as it appears on the wire.
#[derive(Debug)]
pub struct Record {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub next_hop: u32,
    pub input_if: u16,
    pub output_if: u16,
    pub pkts: u32,
    pub bytes: u32,
    pub start_time: u32,
    pub end_time: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_flags: u8,
    pub protocol: u8,
    pub tos: u8,
    pub src_as: u16,
    pub dst_as: u16,
    pub src_mask: u8,
    pub dst_mask: u8,
}

impl Record {
    pub const SIZE: usize = 48;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::ShortHeader {
                len: buf.len(),
                header_len: Self::SIZE,
            });
        }

        Ok(Record {
            src_addr: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            dst_addr: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            next_hop: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            input_if: u16::from_be_bytes(buf[12..14].try_into().unwrap()),
            output_if: u16::from_be_bytes(buf[14..16].try_into().unwrap()),
            pkts: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            bytes: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
            start_time: u32::from_be_bytes(buf[24..28].try_into().unwrap()),
            end_time: u32::from_be_bytes(buf[28..32].try_into().unwrap()),
            src_port: u16::from_be_bytes(buf[32..34].try_into().unwrap()),
            dst_port: u16::from_be_bytes(buf[34..36].try_into().unwrap()),
            // buf[36] is pad1, unused
            tcp_flags: buf[37],
            protocol: buf[38],
            tos: buf[39],
            src_as: u16::from_be_bytes(buf[40..42].try_into().unwrap()),
            dst_as: u16::from_be_bytes(buf[42..44].try_into().unwrap()),
            src_mask: buf[44],
            dst_mask: buf[45],
            // buf[46..48] is pad2, unused
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::net::Ipv4Addr;

    const HEADER_PAYLOAD: [u8; Header::SIZE] = hex!(
        "00 05 00 10 00 00 04 b2 60 80 b8 9c 1a 47 ff 30
         00 00 00 02 01 00 00 00"
    );

    const RECORD_PAYLOAD: [u8; Record::SIZE] = hex!(
        "70 0a 14 0a ac 1e be 0a ac c7 0f 01 00 00 00 00
         00 00 03 1b 00 00 01 03 00 00 02 36 00 00 03 a8
         00 28 00 50 00 00 06 00 c3 0d 35 bd 15 1a 00 00"
    );

    #[test]
    fn read_valid_header() {
        let header = Header::read(&HEADER_PAYLOAD).unwrap();

        assert_eq!(header.version, VERSION);
        assert_eq!(header.count, 16);
        assert_eq!(header.uptime, 1202);
        assert_eq!(header.unix_secs, 1619048604);
        assert_eq!(header.unix_nsecs, 440926000);
        assert_eq!(header.flow_sequence, 2);
        assert_eq!(header.engine_type, 1);
        assert_eq!(header.engine_id, 0);
    }

    #[test]
    fn read_short_header() {
        let err = Header::read(&HEADER_PAYLOAD[0..Header::SIZE - 1]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::ShortHeader {
                len: Header::SIZE - 1,
                header_len: Header::SIZE
            }
        );
    }

    #[test]
    fn read_valid_record() {
        let record = Record::read(&RECORD_PAYLOAD).unwrap();

        assert_eq!(record.src_addr, u32::from(Ipv4Addr::new(112, 10, 20, 10)));
        assert_eq!(record.dst_addr, u32::from(Ipv4Addr::new(172, 30, 190, 10)));
        assert_eq!(record.next_hop, u32::from(Ipv4Addr::new(172, 199, 15, 1)));
        assert_eq!(record.input_if, 0);
        assert_eq!(record.output_if, 0);
        assert_eq!(record.pkts, 795);
        assert_eq!(record.bytes, 259);
        assert_eq!(record.start_time, 566);
        assert_eq!(record.end_time, 936);
        assert_eq!(record.src_port, 40);
        assert_eq!(record.dst_port, 80);
        assert_eq!(record.tcp_flags, 0);
        assert_eq!(record.protocol, 6);
        assert_eq!(record.tos, 0);
        assert_eq!(record.src_as, 49933);
        assert_eq!(record.dst_as, 13757);
        assert_eq!(record.src_mask, 21);
        assert_eq!(record.dst_mask, 26);
    }
}
