//! Probe frame layout, template construction and validation.
//!
//! A probe is a complete Ethernet frame carrying an IPv4 / UDP-Lite datagram whose
//! payload is a magic marker followed by the monotonic time it was sent at.
//!
//! Wire format (66 bytes):
//! ```text
//!  offset  size  field
//!       0     6  Ethernet destination
//!       6     6  Ethernet source
//!      12     2  EtherType (0x0800)
//!      14    20  IPv4 header (no options, DF, TTL 64, protocol 136)
//!      34     2  UDP-Lite source port (7)
//!      36     2  UDP-Lite destination port (7)
//!      38     2  UDP-Lite checksum coverage (8)
//!      40     2  UDP-Lite checksum (sentinel, never verified)
//!      42     8  magic, big-endian
//!      50     8  timestamp seconds, little-endian
//!      58     8  timestamp nanoseconds, little-endian
//! ```
//! Header fields are in network byte order. The timestamp keeps the in-memory
//! `timespec` layout of little-endian hosts.

use std::net::Ipv4Addr;

use pnet::{
    packet::{ethernet::EtherTypes, ip::IpNextHeaderProtocol, util::checksum},
    util::MacAddr,
};
use rand::RngCore;

use crate::{
    configuration::{EngineConfig, LinkAddress},
    time::Timestamp,
};

/// Ethernet header length.
pub const ETHER_HEADER_LEN: usize = 14;
/// IPv4 header length (IHL 5, no options).
pub const IPV4_HEADER_LEN: usize = 20;
/// UDP-Lite header length.
pub const TRANSPORT_HEADER_LEN: usize = 8;
/// Magic marker length.
pub const MAGIC_LEN: usize = 8;
/// Timestamp length (seconds + nanoseconds, 8 bytes each).
pub const TIMESTAMP_LEN: usize = 16;

/// Total probe frame length on the wire.
pub const FRAME_LEN: usize =
    ETHER_HEADER_LEN + IPV4_HEADER_LEN + TRANSPORT_HEADER_LEN + MAGIC_LEN + TIMESTAMP_LEN;

const _: () = assert!(FRAME_LEN == 66);

/// Marker identifying probe frames ("Rtt Calc").
pub const PROBE_MAGIC: u64 = 0x5274_7420_4361_6C63;

/// EtherType carried by probes, also used as the ingress socket filter.
pub const PROBE_ETHER_TYPE: u16 = EtherTypes::Ipv4.0;

/// IANA protocol number for UDP-Lite.
pub const IPPROTO_UDPLITE: u8 = 136;

const IP_OFFSET: usize = ETHER_HEADER_LEN;
const TRANSPORT_OFFSET: usize = IP_OFFSET + IPV4_HEADER_LEN;
const MAGIC_OFFSET: usize = TRANSPORT_OFFSET + TRANSPORT_HEADER_LEN;
const TIMESTAMP_OFFSET: usize = MAGIC_OFFSET + MAGIC_LEN;

/// IPv4 header of a probe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NetworkHeader {
    /// Version (high nibble) and header length in 32-bit words (low nibble).
    pub version_ihl: u8,
    /// DSCP and ECN bits.
    pub tos: u8,
    /// Length of the IPv4 datagram including this header.
    pub total_length: u16,
    pub identification: u16,
    /// Flags (top three bits) and fragment offset.
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: IpNextHeaderProtocol,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl NetworkHeader {
    /// The constant header every probe carries, checksum included.
    pub fn probe() -> Self {
        let mut header = NetworkHeader {
            version_ihl: 0x45,
            tos: 0,
            total_length: (IPV4_HEADER_LEN + TRANSPORT_HEADER_LEN + MAGIC_LEN + TIMESTAMP_LEN)
                as u16,
            identification: 0xcda3,
            flags_fragment: 0x4000,
            ttl: 64,
            protocol: IpNextHeaderProtocol::new(IPPROTO_UDPLITE),
            checksum: 0,
            source: Ipv4Addr::new(192, 168, 85, 2),
            destination: Ipv4Addr::new(192, 168, 85, 1),
        };
        header.checksum = checksum(&header.to_bytes(), 5);
        header
    }

    fn to_bytes(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut buf = [0u8; IPV4_HEADER_LEN];
        buf[0] = self.version_ihl;
        buf[1] = self.tos;
        buf[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.identification.to_be_bytes());
        buf[6..8].copy_from_slice(&self.flags_fragment.to_be_bytes());
        buf[8] = self.ttl;
        buf[9] = self.protocol.0;
        buf[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        buf[12..16].copy_from_slice(&self.source.octets());
        buf[16..20].copy_from_slice(&self.destination.octets());
        buf
    }

    fn from_bytes(buf: &[u8; FRAME_LEN]) -> Self {
        let at = IP_OFFSET;
        NetworkHeader {
            version_ihl: buf[at],
            tos: buf[at + 1],
            total_length: be_u16(buf, at + 2),
            identification: be_u16(buf, at + 4),
            flags_fragment: be_u16(buf, at + 6),
            ttl: buf[at + 8],
            protocol: IpNextHeaderProtocol::new(buf[at + 9]),
            checksum: be_u16(buf, at + 10),
            source: Ipv4Addr::new(buf[at + 12], buf[at + 13], buf[at + 14], buf[at + 15]),
            destination: Ipv4Addr::new(buf[at + 16], buf[at + 17], buf[at + 18], buf[at + 19]),
        }
    }
}

/// UDP-Lite header of a probe.
///
/// The checksum is a fixed sentinel: only arrival matters, not content integrity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub source_port: u16,
    pub destination_port: u16,
    /// Checksum coverage, limited to the transport header itself.
    pub coverage: u16,
    pub checksum: u16,
}

impl TransportHeader {
    pub fn probe() -> Self {
        TransportHeader {
            source_port: 7,
            destination_port: 7,
            coverage: TRANSPORT_HEADER_LEN as u16,
            checksum: 0xd47b,
        }
    }
}

/// A decoded probe frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    pub destination: MacAddr,
    pub source: MacAddr,
    pub ether_type: u16,
    pub network: NetworkHeader,
    pub transport: TransportHeader,
    pub magic: u64,
    /// Monotonic time the probe was handed to the egress socket.
    pub timestamp: Timestamp,
}

impl Frame {
    /// Builds the probe template with every protocol constant filled in.
    ///
    /// Fixed link addresses are copied from `conf`. Random ones start from the
    /// sub-second bits of `now`, so two runs started at different instants use
    /// different initial addresses.
    pub fn template(conf: &EngineConfig, now: Timestamp) -> Self {
        Frame {
            destination: initial_link_address(&conf.destination, now),
            source: initial_link_address(&conf.source, now),
            ether_type: PROBE_ETHER_TYPE,
            network: NetworkHeader::probe(),
            transport: TransportHeader::probe(),
            magic: PROBE_MAGIC,
            timestamp: Timestamp::default(),
        }
    }

    /// Overwrites the timestamp, leaving every other field untouched.
    pub fn stamp(&mut self, now: Timestamp) {
        self.timestamp = now;
    }

    /// Replaces the link addresses configured as random with fresh values.
    pub fn randomize_addresses<R: RngCore + ?Sized>(&mut self, conf: &EngineConfig, rng: &mut R) {
        if conf.destination.is_random() {
            self.destination = random_link_address(rng);
        }
        if conf.source.is_random() {
            self.source = random_link_address(rng);
        }
    }

    /// Serializes the frame to its 66-byte wire format.
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[0..6].copy_from_slice(&mac_octets(self.destination));
        buf[6..12].copy_from_slice(&mac_octets(self.source));
        buf[12..14].copy_from_slice(&self.ether_type.to_be_bytes());

        buf[IP_OFFSET..TRANSPORT_OFFSET].copy_from_slice(&self.network.to_bytes());

        let t = TRANSPORT_OFFSET;
        buf[t..t + 2].copy_from_slice(&self.transport.source_port.to_be_bytes());
        buf[t + 2..t + 4].copy_from_slice(&self.transport.destination_port.to_be_bytes());
        buf[t + 4..t + 6].copy_from_slice(&self.transport.coverage.to_be_bytes());
        buf[t + 6..t + 8].copy_from_slice(&self.transport.checksum.to_be_bytes());

        buf[MAGIC_OFFSET..TIMESTAMP_OFFSET].copy_from_slice(&self.magic.to_be_bytes());
        buf[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]
            .copy_from_slice(&self.timestamp.secs.to_le_bytes());
        buf[TIMESTAMP_OFFSET + 8..FRAME_LEN].copy_from_slice(&self.timestamp.nanos.to_le_bytes());
        buf
    }
}

/// Decodes `bytes` if, and only if, it is a probe frame.
///
/// Anything that is not exactly [`FRAME_LEN`] bytes long or does not carry
/// [`PROBE_MAGIC`] yields `None`; such traffic is expected on the ingress
/// interface and is not an error.
pub fn parse_and_validate(bytes: &[u8]) -> Option<Frame> {
    let buf: &[u8; FRAME_LEN] = bytes.try_into().ok()?;

    let magic = u64::from_be_bytes(sub_array(buf, MAGIC_OFFSET));
    if magic != PROBE_MAGIC {
        return None;
    }

    let t = TRANSPORT_OFFSET;
    Some(Frame {
        destination: mac_from(sub_array(buf, 0)),
        source: mac_from(sub_array(buf, 6)),
        ether_type: be_u16(buf, 12),
        network: NetworkHeader::from_bytes(buf),
        transport: TransportHeader {
            source_port: be_u16(buf, t),
            destination_port: be_u16(buf, t + 2),
            coverage: be_u16(buf, t + 4),
            checksum: be_u16(buf, t + 6),
        },
        magic,
        timestamp: Timestamp {
            secs: u64::from_le_bytes(sub_array(buf, TIMESTAMP_OFFSET)),
            nanos: u64::from_le_bytes(sub_array(buf, TIMESTAMP_OFFSET + 8)),
        },
    })
}

/// Fills `mac` with pseudo-random bytes and clears the group bit so the result
/// is always a unicast address.
pub fn randomize_link_address<R: RngCore + ?Sized>(mac: &mut [u8; 6], rng: &mut R) {
    rng.fill_bytes(mac);
    mac[0] &= 0xfe;
}

fn random_link_address<R: RngCore + ?Sized>(rng: &mut R) -> MacAddr {
    let mut mac = [0u8; 6];
    randomize_link_address(&mut mac, rng);
    mac_from(mac)
}

fn initial_link_address(addr: &LinkAddress, now: Timestamp) -> MacAddr {
    match addr {
        LinkAddress::Fixed(mac) => *mac,
        LinkAddress::Random => {
            let mut mac = [0u8; 6];
            mac[..4].copy_from_slice(&(now.nanos as u32).to_le_bytes());
            mac[0] &= 0xfe;
            mac_from(mac)
        }
    }
}

pub(crate) fn mac_octets(mac: MacAddr) -> [u8; 6] {
    [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]
}

pub(crate) fn mac_from(b: [u8; 6]) -> MacAddr {
    MacAddr::new(b[0], b[1], b[2], b[3], b[4], b[5])
}

fn sub_array<const N: usize>(buf: &[u8; FRAME_LEN], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

fn be_u16(buf: &[u8; FRAME_LEN], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}
