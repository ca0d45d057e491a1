use etherparse::{LaxPacketHeaders, LaxPayloadSlice, NetHeaders, TransportHeader};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::trace;

use crate::types::{DnsQuery, IpLayer, PacketRecord, PortPair, TcpFlags};

const DNS_HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;

/// DNS, mDNS and LLMNR.
pub fn is_dns_port(port: u16) -> bool {
    matches!(port, 53 | 5353 | 5355)
}

/// Decodes an Ethernet II frame. `None` when not even the Ethernet header is
/// present; a record with `ip: None` for frames without a network layer.
/// Parsing is lax: a frame cut short inside the transport header keeps its
/// IP layer and simply has no ports.
pub fn decode_ethernet(timestamp_us: u64, wire_len: u32, data: &[u8]) -> Option<PacketRecord> {
    let parsed = match LaxPacketHeaders::from_ethernet(data) {
        Ok(p) => p,
        Err(e) => {
            trace!(error = %e, "undecodable frame");
            return None;
        }
    };
    if let Some((err, layer)) = &parsed.stop_err {
        trace!(error = %err, ?layer, "frame decoded partially");
    }

    let mut record = PacketRecord::new(timestamp_us, wire_len);

    let (src, dst, mut protocol) = match &parsed.net {
        Some(NetHeaders::Ipv4(ipv4, _)) => (
            IpAddr::V4(Ipv4Addr::from(ipv4.source)),
            IpAddr::V4(Ipv4Addr::from(ipv4.destination)),
            ipv4.protocol.0,
        ),
        Some(NetHeaders::Ipv6(ipv6, _)) => (
            IpAddr::V6(Ipv6Addr::from(ipv6.source)),
            IpAddr::V6(Ipv6Addr::from(ipv6.destination)),
            ipv6.next_header.0,
        ),
        _ => return Some(record),
    };

    match &parsed.transport {
        Some(TransportHeader::Tcp(tcp)) => {
            protocol = 6;
            let flags = (tcp.cwr as u8) << 7
                | (tcp.ece as u8) << 6
                | (tcp.urg as u8) << 5
                | (tcp.ack as u8) << 4
                | (tcp.psh as u8) << 3
                | (tcp.rst as u8) << 2
                | (tcp.syn as u8) << 1
                | (tcp.fin as u8);
            record.ports = Some(PortPair { src: tcp.source_port, dst: tcp.destination_port });
            record.tcp_flags = Some(TcpFlags(flags));
        }
        Some(TransportHeader::Udp(udp)) => {
            protocol = 17;
            record.ports = Some(PortPair { src: udp.source_port, dst: udp.destination_port });
            if is_dns_port(udp.source_port) || is_dns_port(udp.destination_port) {
                if let LaxPayloadSlice::Udp { payload, .. } = &parsed.payload {
                    record.dns = parse_dns_question(payload);
                }
            }
        }
        Some(TransportHeader::Icmpv4(_)) => protocol = 1,
        Some(TransportHeader::Icmpv6(_)) => protocol = 58,
        _ => {}
    }

    record.ip = Some(IpLayer { src, dst, protocol });
    Some(record)
}

/// First question of a DNS message. The name keeps its trailing root dot.
/// Compression pointers in the question are rejected.
pub fn parse_dns_question(payload: &[u8]) -> Option<DnsQuery> {
    if payload.len() < DNS_HEADER_LEN {
        return None;
    }
    let rcode = payload[3] & 0x0f;
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    if qdcount == 0 {
        return None;
    }

    let mut pos = DNS_HEADER_LEN;
    let mut name = String::new();
    loop {
        let label_len = *payload.get(pos)? as usize;
        pos += 1;
        if label_len == 0 {
            break;
        }
        if label_len > MAX_LABEL_LEN {
            trace!(label_len, "compressed or invalid label in question");
            return None;
        }
        let label = payload.get(pos..pos + label_len)?;
        name.push_str(&String::from_utf8_lossy(label));
        name.push('.');
        pos += label_len;
    }
    if name.is_empty() {
        name.push('.');
    }

    let qtype_bytes = payload.get(pos..pos + 2)?;
    let qtype = u16::from_be_bytes([qtype_bytes[0], qtype_bytes[1]]);

    Some(DnsQuery { name, qtype, rcode })
}
