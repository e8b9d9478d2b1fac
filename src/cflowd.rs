//! "cflowd" output format: a 55-byte packed record per flow, plus the
//! validate+decode pipeline that turns a raw NetFlow v5 datagram into a run
//! of these records.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::DecodeError;
use crate::netflow5::{Header, Record};
use crate::sequence::SequenceTracker;

/// On-disk length of a single cflowd record. Deliberately not
/// `size_of::<CflowdRecord>()`: a naturally-aligned struct would pad
/// `tcpFlags` out to a multiple of 4, breaking compatibility with readers
/// expecting the documented 55-byte layout.
pub const RECORD_LEN: usize = 55;

/// One post-processed flow, laid out exactly as the consumer expects, in
/// host byte order. See the field table in the module-level ingest spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CflowdRecord {
    pub index: u32,
    pub router: u32,
    pub src_addr: u32,
    pub dst_addr: u32,
    pub input_if: u16,
    pub output_if: u16,
    pub src_port: u16,
    pub dst_port: u16,
    pub pkts: u32,
    pub bytes: u32,
    pub next_hop: u32,
    pub start_time: u32,
    pub end_time: u32,
    pub protocol: u8,
    pub tos: u8,
    pub src_as: u16,
    pub dst_as: u16,
    pub src_mask: u8,
    pub dst_mask: u8,
    pub tcp_flags: u8,
}

impl CflowdRecord {
    /// Appends this record's 55 bytes to `out` in host byte order.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.index.to_ne_bytes());
        out.extend_from_slice(&self.router.to_ne_bytes());
        out.extend_from_slice(&self.src_addr.to_ne_bytes());
        out.extend_from_slice(&self.dst_addr.to_ne_bytes());
        out.extend_from_slice(&self.input_if.to_ne_bytes());
        out.extend_from_slice(&self.output_if.to_ne_bytes());
        out.extend_from_slice(&self.src_port.to_ne_bytes());
        out.extend_from_slice(&self.dst_port.to_ne_bytes());
        out.extend_from_slice(&self.pkts.to_ne_bytes());
        out.extend_from_slice(&self.bytes.to_ne_bytes());
        out.extend_from_slice(&self.next_hop.to_ne_bytes());
        out.extend_from_slice(&self.start_time.to_ne_bytes());
        out.extend_from_slice(&self.end_time.to_ne_bytes());
        out.push(self.protocol);
        out.push(self.tos);
        out.extend_from_slice(&self.src_as.to_ne_bytes());
        out.extend_from_slice(&self.dst_as.to_ne_bytes());
        out.push(self.src_mask);
        out.push(self.dst_mask);
        out.push(self.tcp_flags);
        out.extend_from_slice(&[0u8; 2]); // reserved padding, must be zero
    }
}

/// Reconstructs a flow's wall-clock timestamp from the router's relative
/// SysUptime counter.
///
/// This intentionally reproduces a known defect in the reference decoder:
/// it does not account for the 23-day wrap of the 32-bit millisecond uptime
/// counter. Bit-for-bit compatibility with the existing downstream consumer
/// requires this exact arithmetic, wrap and all.
fn reconstruct_time(record_time: u32, uptime: u32, unix_secs: u32) -> u32 {
    let delta = (record_time as i32).wrapping_sub(uptime as i32);
    let secs = delta / 1000; // toward-zero integer division, as in the source
    (secs as i64 + unix_secs as i64) as u32
}

static VERSION_WARNING_LOGGED: AtomicBool = AtomicBool::new(false);

/// Result of successfully validating and decoding one datagram.
#[derive(Debug)]
pub struct DecodedDatagram {
    /// The encoded cflowd byte run, `55 * header.count` bytes.
    pub bytes: Vec<u8>,
    /// Flows dropped since the previous datagram from this router (0 when
    /// drop detection is disabled for the port).
    pub dropped: u32,
    /// The datagram's starting flow sequence number, used by the writer to
    /// report the offending range when logging a drop.
    pub flow_sequence: u32,
}

/// Validates and decodes one NetFlow v5 datagram.
pub fn decode_datagram(
    buf: &[u8],
    router: Ipv4Addr,
    drop_detection: bool,
    tracker: &mut SequenceTracker,
) -> Result<DecodedDatagram, DecodeError> {
    let header = Header::read(buf)?;

    if header.version != crate::netflow5::VERSION {
        if !VERSION_WARNING_LOGGED.swap(true, Ordering::Relaxed) {
            log::error!("seeing flows for unsupported version {}", header.version);
        }
        return Err(DecodeError::UnsupportedVersion {
            version: header.version,
        });
    }

    let expected_len = Header::SIZE + header.count as usize * Record::SIZE;
    if buf.len() != expected_len {
        return Err(DecodeError::LengthMismatch {
            len: buf.len(),
            cnt: header.count,
        });
    }

    let dropped = if drop_detection {
        tracker.observe(router, header.flow_sequence, header.count as u32)
    } else {
        0
    };

    let router_host = u32::from(router);
    let mut out = Vec::with_capacity(header.count as usize * RECORD_LEN);

    let mut offset = Header::SIZE;
    for i in 0..header.count as u32 {
        let record = Record::read(&buf[offset..offset + Record::SIZE])?;

        let cflowd = CflowdRecord {
            index: header.flow_sequence.wrapping_add(i),
            router: router_host,
            src_addr: record.src_addr,
            dst_addr: record.dst_addr,
            input_if: record.input_if,
            output_if: record.output_if,
            src_port: record.src_port,
            dst_port: record.dst_port,
            pkts: record.pkts,
            bytes: record.bytes,
            next_hop: record.next_hop,
            start_time: reconstruct_time(record.start_time, header.uptime, header.unix_secs),
            end_time: reconstruct_time(record.end_time, header.uptime, header.unix_secs),
            protocol: record.protocol,
            tos: record.tos,
            src_as: record.src_as,
            dst_as: record.dst_as,
            src_mask: record.src_mask,
            dst_mask: record.dst_mask,
            tcp_flags: record.tcp_flags,
        };

        cflowd.encode_into(&mut out);
        offset += Record::SIZE;
    }

    Ok(DecodedDatagram {
        bytes: out,
        dropped,
        flow_sequence: header.flow_sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;

    fn push_be16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    fn push_be32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn build_datagram(
        cnt: u16,
        uptime: u32,
        unix_secs: u32,
        flow_sequence: u32,
        records: &[(Ipv4Addr, Ipv4Addr, u32, u32, u32, u32, u16, u16)],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        push_be16(&mut buf, 5); // version
        push_be16(&mut buf, cnt);
        push_be32(&mut buf, uptime);
        push_be32(&mut buf, unix_secs);
        push_be32(&mut buf, 0); // unix_nsecs
        push_be32(&mut buf, flow_sequence);
        buf.push(0); // engine_type
        buf.push(0); // engine_id
        push_be16(&mut buf, 0); // sampling

        for &(src, dst, start_time, end_time, pkts, bytes, src_port, dst_port) in records {
            push_be32(&mut buf, u32::from(src));
            push_be32(&mut buf, u32::from(dst));
            push_be32(&mut buf, u32::from(Ipv4Addr::new(10, 0, 0, 254))); // next hop
            push_be16(&mut buf, 1); // input_if
            push_be16(&mut buf, 2); // output_if
            push_be32(&mut buf, pkts);
            push_be32(&mut buf, bytes);
            push_be32(&mut buf, start_time);
            push_be32(&mut buf, end_time);
            push_be16(&mut buf, src_port);
            push_be16(&mut buf, dst_port);
            buf.push(0); // pad1
            buf.push(0x18); // tcp_flags
            buf.push(6); // protocol
            buf.push(0); // tos
            push_be16(&mut buf, 0); // src_as
            push_be16(&mut buf, 0); // dst_as
            buf.push(24); // src_mask
            buf.push(24); // dst_mask
            push_be16(&mut buf, 0); // pad2
        }

        buf
    }

    #[test]
    fn scenario_s1_single_record() {
        let datagram = build_datagram(
            1,
            10_000,
            1_000_000_000,
            7,
            &[(
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                5_000,
                8_000,
                3,
                180,
                1234,
                80,
            )],
        );

        let mut tracker = SequenceTracker::new();
        let decoded = decode_datagram(
            &datagram,
            Ipv4Addr::new(192, 0, 2, 1),
            true,
            &mut tracker,
        )
        .unwrap();

        assert_eq!(decoded.dropped, 0);
        assert_eq!(decoded.bytes.len(), RECORD_LEN);

        let out = &decoded.bytes;
        assert_eq!(u32::from_ne_bytes(out[0..4].try_into().unwrap()), 7);
        assert_eq!(
            u32::from_ne_bytes(out[36..40].try_into().unwrap()),
            999_999_995
        );
        assert_eq!(
            u32::from_ne_bytes(out[40..44].try_into().unwrap()),
            999_999_998
        );
    }

    #[test]
    fn boundary_b1_zero_count_emits_nothing() {
        let datagram = build_datagram(0, 0, 0, 0, &[]);
        let mut tracker = SequenceTracker::new();
        let decoded =
            decode_datagram(&datagram, Ipv4Addr::new(192, 0, 2, 1), true, &mut tracker).unwrap();
        assert_eq!(decoded.dropped, 0);
        assert!(decoded.bytes.is_empty());
    }

    #[test]
    fn boundary_b3_length_mismatch_is_rejected() {
        let mut datagram = build_datagram(
            1,
            0,
            0,
            0,
            &[(
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                0,
                0,
                0,
                0,
                0,
                0,
            )],
        );
        datagram.push(0); // one byte too many
        let mut tracker = SequenceTracker::new();
        let err = decode_datagram(&datagram, Ipv4Addr::new(192, 0, 2, 1), true, &mut tracker)
            .unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { .. }));
    }

    #[test]
    fn boundary_b4_wrong_version_is_rejected() {
        let mut datagram = build_datagram(0, 0, 0, 0, &[]);
        datagram[0] = 0x00;
        datagram[1] = 0x09; // version 9
        let mut tracker = SequenceTracker::new();
        let err = decode_datagram(&datagram, Ipv4Addr::new(192, 0, 2, 1), true, &mut tracker)
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion { version: 9 }));
    }

    #[test]
    fn scenario_s2_drop_detection_across_datagrams() {
        let router = Ipv4Addr::new(192, 0, 2, 1);
        let mut tracker = SequenceTracker::new();

        let first = build_datagram(
            3,
            0,
            0,
            7,
            &[
                (Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 0, 0, 0, 0, 0, 0),
                (Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 0, 0, 0, 0, 0, 0),
                (Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 0, 0, 0, 0, 0, 0),
            ],
        );
        let decoded = decode_datagram(&first, router, true, &mut tracker).unwrap();
        assert_eq!(decoded.dropped, 0);

        let second = build_datagram(
            2,
            0,
            0,
            11,
            &[
                (Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 0, 0, 0, 0, 0, 0),
                (Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 0, 0, 0, 0, 0, 0),
            ],
        );
        let decoded = decode_datagram(&second, router, true, &mut tracker).unwrap();
        assert_eq!(decoded.dropped, 1);
    }
}
