use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[inline]
pub fn micros_to_secs(us: u64) -> f64 {
    us as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpLayer {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub src: u16,
    pub dst: u16,
}

/// TCP control bits, packed with the same layout as the TCP header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;

    #[inline]
    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// First question of a decoded DNS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub name: String,
    pub qtype: u16,
    pub rcode: u8,
}

/// A decoded packet as handed over by the capture source.
///
/// `ip` is `None` for frames that carry no network layer; such records have no
/// flow key and are skipped by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub timestamp_us: u64,
    pub length: u32,
    pub ip: Option<IpLayer>,
    pub ports: Option<PortPair>,
    pub tcp_flags: Option<TcpFlags>,
    pub dns: Option<DnsQuery>,
}

impl PacketRecord {
    pub fn new(timestamp_us: u64, length: u32) -> Self {
        Self {
            timestamp_us,
            length,
            ip: None,
            ports: None,
            tcp_flags: None,
            dns: None,
        }
    }

    pub fn with_ip(mut self, src: IpAddr, dst: IpAddr, protocol: u8) -> Self {
        self.ip = Some(IpLayer { src, dst, protocol });
        self
    }

    pub fn with_ports(mut self, src: u16, dst: u16) -> Self {
        self.ports = Some(PortPair { src, dst });
        self
    }

    pub fn with_tcp_flags(mut self, flags: u8) -> Self {
        self.tcp_flags = Some(TcpFlags(flags));
        self
    }

    pub fn with_dns(mut self, name: &str, qtype: u16, rcode: u8) -> Self {
        self.dns = Some(DnsQuery { name: name.to_string(), qtype, rcode });
        self
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct NetworkStats {
    pub flow_count: i64,
    pub tracked_domains: i64,
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub total_packets: i64,
    pub total_bytes: i64,
    pub skipped_packets: i64,
    pub dropped_vectors: i64,
    pub tunneling_events: i64,
    pub uptime_seconds: i64,
}
