//! ICMPv4 echo codec.
//!
//! Echo request layout (offsets in bytes):
//!
//! | offset | width | field                                   |
//! |--------|-------|-----------------------------------------|
//! | 0      | 1     | type (8 = echo request)                 |
//! | 1      | 1     | code (0)                                |
//! | 2      | 2     | checksum                                |
//! | 4      | 2     | identifier, network order               |
//! | 6      | 2     | sequence number, network order          |
//! | 8      | 8     | send timestamp, ns since UNIX epoch, BE |
//! | 16     | ..    | fill pattern up to the payload length   |
//!
//! Replies read from a raw socket carry the IPv4 header in front of the ICMP
//! message. Its length is the IHL nibble of byte 0, counted in 32-bit words.
use std::{net::Ipv4Addr, time::Duration};

use crate::error::DecodeError;

pub const ECHO_REPLY: u8 = 0;
pub const ECHO_REQUEST: u8 = 8;

pub const ICMP_HEADER_LEN: usize = 8;
pub const TIMESTAMP_LEN: usize = 8;
/// The payload must at least hold the send timestamp.
pub const MIN_PAYLOAD_LEN: usize = TIMESTAMP_LEN;
pub const DEFAULT_PAYLOAD_LEN: usize = 56;
const MIN_IPV4_HEADER_LEN: usize = 20;
/// Smallest datagram `decode_reply` accepts.
pub const MIN_DATAGRAM_LEN: usize =
    MIN_IPV4_HEADER_LEN + ICMP_HEADER_LEN + TIMESTAMP_LEN;

/// Internet checksum (RFC 1071).
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    // An odd trailing byte is the high byte of a zero padded word
    if let [last] = words.remainder() {
        sum = sum.wrapping_add(u32::from(*last) << 8);
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// True when `data`, checksum field included, sums to zero.
pub fn verify(data: &[u8]) -> bool {
    checksum(data) == 0
}

/// Builds an echo request. `payload_len` is raised to `MIN_PAYLOAD_LEN` if
/// smaller.
pub fn encode_request(
    identifier: u16,
    sequence: u16,
    send_timestamp: Duration,
    payload_len: usize,
) -> Vec<u8> {
    let payload_len = payload_len.max(MIN_PAYLOAD_LEN);
    let mut packet = vec![0u8; ICMP_HEADER_LEN + payload_len];

    packet[0] = ECHO_REQUEST;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let nanos = send_timestamp.as_nanos() as u64;
    let payload = &mut packet[ICMP_HEADER_LEN..];
    payload[..TIMESTAMP_LEN].copy_from_slice(&nanos.to_be_bytes());
    for (i, byte) in payload[TIMESTAMP_LEN..].iter_mut().enumerate() {
        *byte = i as u8;
    }

    let cksum = checksum(&packet);
    packet[2..4].copy_from_slice(&cksum.to_be_bytes());
    packet
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Fields {
    /// Header length in bytes
    pub header_len: usize,
    pub total_len: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpFields {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub send_timestamp: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub ip: Ipv4Fields,
    pub icmp: IcmpFields,
    /// Bytes following the IP header
    pub icmp_len: usize,
}

/// Splits a raw IPv4 datagram into its IP and ICMP echo fields.
pub fn decode_reply(raw: &[u8]) -> Result<Datagram, DecodeError> {
    if raw.len() < MIN_DATAGRAM_LEN {
        return Err(DecodeError::Truncated {
            len: raw.len(),
            needed: MIN_DATAGRAM_LEN,
        });
    }

    let ihl = raw[0] & 0x0f;
    if usize::from(ihl) * 4 < MIN_IPV4_HEADER_LEN {
        return Err(DecodeError::HeaderLength(ihl));
    }
    let header_len = usize::from(ihl) * 4;
    let needed = header_len + ICMP_HEADER_LEN + TIMESTAMP_LEN;
    if raw.len() < needed {
        return Err(DecodeError::Truncated {
            len: raw.len(),
            needed,
        });
    }

    let ip = Ipv4Fields {
        header_len,
        total_len: u16::from_be_bytes([raw[2], raw[3]]),
        ttl: raw[8],
        protocol: raw[9],
        source: Ipv4Addr::new(raw[12], raw[13], raw[14], raw[15]),
        destination: Ipv4Addr::new(raw[16], raw[17], raw[18], raw[19]),
    };

    let icmp = &raw[header_len..];
    let mut nanos = [0u8; TIMESTAMP_LEN];
    nanos.copy_from_slice(&icmp[ICMP_HEADER_LEN..ICMP_HEADER_LEN + TIMESTAMP_LEN]);
    let icmp_fields = IcmpFields {
        icmp_type: icmp[0],
        code: icmp[1],
        checksum: u16::from_be_bytes([icmp[2], icmp[3]]),
        identifier: u16::from_be_bytes([icmp[4], icmp[5]]),
        sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
        send_timestamp: Duration::from_nanos(u64::from_be_bytes(nanos)),
    };

    Ok(Datagram {
        ip,
        icmp: icmp_fields,
        icmp_len: icmp.len(),
    })
}

#[cfg(test)]
mod tests {
    use etherparse::{IcmpEchoHeader, Icmpv4Header, Icmpv4Type, PacketBuilder};

    use super::*;

    const TS: Duration = Duration::from_nanos(1_700_000_000_123_456_789);

    #[test]
    fn checksum_rfc1071_example() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), 0x220d);
    }

    #[test]
    fn checksum_of_zeros() {
        assert_eq!(checksum(&[0u8; 20]), 0xffff);
        assert_eq!(checksum(&[]), 0xffff);
    }

    #[test]
    fn checksum_odd_length_pads_low_byte() {
        assert_eq!(checksum(&[0x01]), !0x0100);
        assert_eq!(checksum(&[0x12, 0x34, 0x56]), !(0x1234u16 + 0x5600));
    }

    #[test]
    fn checksum_folds_carries() {
        // 0xffff + 0xffff + 0x0002 overflows 16 bits twice
        let data = [0xff, 0xff, 0xff, 0xff, 0x00, 0x02];
        assert_eq!(checksum(&data), !0x0002);
    }

    #[test]
    fn encoded_request_verifies() {
        for payload_len in [8, 9, 56, 57, 1000] {
            let packet = encode_request(0xbeef, 42, TS, payload_len);
            assert_eq!(packet.len(), ICMP_HEADER_LEN + payload_len);
            assert!(verify(&packet), "payload_len {}", payload_len);
        }
    }

    #[test]
    fn encoded_request_layout() {
        let packet = encode_request(0x1234, 0xabcd, TS, 12);
        assert_eq!(packet[0], ECHO_REQUEST);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[4..6], &[0x12, 0x34]);
        assert_eq!(&packet[6..8], &[0xab, 0xcd]);
        assert_eq!(&packet[8..16], &(TS.as_nanos() as u64).to_be_bytes());
        assert_eq!(&packet[16..], &[0, 1, 2, 3]);
    }

    #[test]
    fn short_payload_is_raised_to_timestamp() {
        let packet = encode_request(1, 1, TS, 0);
        assert_eq!(packet.len(), ICMP_HEADER_LEN + MIN_PAYLOAD_LEN);
    }

    #[test]
    fn checksum_matches_etherparse() {
        let packet = encode_request(7, 3, TS, 56);
        let header = Icmpv4Header::with_checksum(
            Icmpv4Type::EchoRequest(IcmpEchoHeader { id: 7, seq: 3 }),
            &packet[ICMP_HEADER_LEN..],
        );
        assert_eq!(header.checksum, u16::from_be_bytes([packet[2], packet[3]]));
    }

    fn echo_reply_frame(id: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ipv4([10, 0, 0, 2], [10, 0, 0, 1], 57)
            .icmpv4_echo_reply(id, seq);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    #[test]
    fn decode_echo_reply() {
        let request = encode_request(0x4242, 9, TS, 56);
        let frame = echo_reply_frame(0x4242, 9, &request[ICMP_HEADER_LEN..]);

        let datagram = decode_reply(&frame).unwrap();
        assert_eq!(datagram.ip.header_len, 20);
        assert_eq!(datagram.ip.ttl, 57);
        assert_eq!(datagram.ip.protocol, 1);
        assert_eq!(datagram.ip.total_len as usize, frame.len());
        assert_eq!(datagram.ip.source, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(datagram.ip.destination, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(datagram.icmp.icmp_type, ECHO_REPLY);
        assert_eq!(datagram.icmp.code, 0);
        assert_eq!(datagram.icmp.identifier, 0x4242);
        assert_eq!(datagram.icmp.sequence, 9);
        assert_eq!(datagram.icmp.send_timestamp, TS);
        assert_eq!(datagram.icmp_len, ICMP_HEADER_LEN + 56);
        assert!(verify(&frame[20..]));
    }

    #[test]
    fn decode_honours_ip_options() {
        let request = encode_request(5, 6, TS, 8);
        // 24 byte IP header: IHL 6, one word of options
        let mut frame = vec![0u8; 24];
        frame[0] = 0x46;
        frame[8] = 64;
        frame[9] = 1;
        frame[12..16].copy_from_slice(&[127, 0, 0, 1]);
        frame[16..20].copy_from_slice(&[127, 0, 0, 1]);
        frame.extend_from_slice(&request);
        frame[24] = ECHO_REPLY;

        let datagram = decode_reply(&frame).unwrap();
        assert_eq!(datagram.ip.header_len, 24);
        assert_eq!(datagram.icmp.identifier, 5);
        assert_eq!(datagram.icmp.sequence, 6);
        assert_eq!(datagram.icmp.send_timestamp, TS);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let frame = vec![0x45; MIN_DATAGRAM_LEN - 1];
        assert_eq!(
            decode_reply(&frame),
            Err(DecodeError::Truncated {
                len: MIN_DATAGRAM_LEN - 1,
                needed: MIN_DATAGRAM_LEN
            })
        );
    }

    #[test]
    fn decode_rejects_short_buffer_after_options() {
        // IHL 15 declares a 60 byte header
        let mut frame = vec![0u8; 64];
        frame[0] = 0x4f;
        assert_eq!(
            decode_reply(&frame),
            Err(DecodeError::Truncated {
                len: 64,
                needed: 60 + ICMP_HEADER_LEN + TIMESTAMP_LEN
            })
        );
    }

    #[test]
    fn decode_rejects_bad_header_length() {
        let mut frame = vec![0u8; 64];
        frame[0] = 0x44;
        assert_eq!(decode_reply(&frame), Err(DecodeError::HeaderLength(4)));
    }
}
