use std::net::IpAddr;

use crate::types::{PacketRecord, TcpFlags};

/// Canonical bidirectional 5-tuple.
///
/// The `low` side is the lexicographically smaller `(addr, port)` pair, address
/// compared first, then port. Both directions of a conversation resolve to the
/// same key.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Copy, PartialOrd, Ord)]
pub struct FlowKey {
    pub addr_low: IpAddr,
    pub addr_high: IpAddr,
    pub port_low: u16,
    pub port_high: u16,
    pub protocol: u8,
}

impl FlowKey {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr, src_port: u16, dst_port: u16, protocol: u8) -> Self {
        // Normalize flow key so both directions map to the same entry
        if (src_ip, src_port) <= (dst_ip, dst_port) {
            Self {
                addr_low: src_ip,
                addr_high: dst_ip,
                port_low: src_port,
                port_high: dst_port,
                protocol,
            }
        } else {
            Self {
                addr_low: dst_ip,
                addr_high: src_ip,
                port_low: dst_port,
                port_high: src_port,
                protocol,
            }
        }
    }

    /// Key for a decoded packet, or `None` when it has no network layer.
    pub fn resolve(pkt: &PacketRecord) -> Option<Self> {
        let ip = pkt.ip?;
        let (src_port, dst_port) = pkt.ports.map_or((0, 0), |p| (p.src, p.dst));
        Some(Self::new(ip.src, ip.dst, src_port, dst_port, ip.protocol))
    }

    /// Forward means the packet was sent from the key's low side.
    pub fn direction_of(&self, src_ip: IpAddr, src_port: u16) -> FlowDirection {
        if (src_ip, src_port) == (self.addr_low, self.port_low) {
            FlowDirection::Forward
        } else {
            FlowDirection::Backward
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagCounters {
    pub fin: u32,
    pub syn: u32,
    pub rst: u32,
    pub psh: u32,
    pub ack: u32,
    pub urg: u32,
    pub cwr: u32,
    pub ece: u32,
}

impl FlagCounters {
    fn count(&mut self, flags: TcpFlags) {
        if flags.has(TcpFlags::FIN) { self.fin += 1; }
        if flags.has(TcpFlags::SYN) { self.syn += 1; }
        if flags.has(TcpFlags::RST) { self.rst += 1; }
        if flags.has(TcpFlags::PSH) { self.psh += 1; }
        if flags.has(TcpFlags::ACK) { self.ack += 1; }
        if flags.has(TcpFlags::URG) { self.urg += 1; }
        if flags.has(TcpFlags::CWR) { self.cwr += 1; }
        if flags.has(TcpFlags::ECE) { self.ece += 1; }
    }
}

/// Per-flow aggregate state. Owned by the flow table; all times in microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    pub start_time: u64,
    pub last_seen_time: u64,
    last_packet_time: Option<u64>,

    // Arrival times per direction
    pub fwd_timestamps: Vec<u64>,
    pub bwd_timestamps: Vec<u64>,

    pub fwd_bytes: u64,
    pub bwd_bytes: u64,

    // Packet lengths, combined and per direction
    pub packet_lengths: Vec<u32>,
    pub fwd_lengths: Vec<u32>,
    pub bwd_lengths: Vec<u32>,

    // Inter-arrival times
    pub flow_iats: Vec<u64>,
    pub fwd_iats: Vec<u64>,
    pub bwd_iats: Vec<u64>,

    pub flags: FlagCounters,
}

impl FlowState {
    pub fn new(now: u64) -> Self {
        Self {
            start_time: now,
            last_seen_time: now,
            last_packet_time: None,
            fwd_timestamps: Vec::new(),
            bwd_timestamps: Vec::new(),
            fwd_bytes: 0,
            bwd_bytes: 0,
            packet_lengths: Vec::new(),
            fwd_lengths: Vec::new(),
            bwd_lengths: Vec::new(),
            flow_iats: Vec::new(),
            fwd_iats: Vec::new(),
            bwd_iats: Vec::new(),
            flags: FlagCounters::default(),
        }
    }

    /// Helper the table uses to expire idle flows.
    #[inline]
    pub fn last_seen_micros(&self) -> u64 {
        self.last_seen_time
    }

    pub fn total_fwd_packets(&self) -> usize {
        self.fwd_timestamps.len()
    }

    pub fn total_bwd_packets(&self) -> usize {
        self.bwd_timestamps.len()
    }

    pub fn record_packet(&mut self, pkt: &PacketRecord, direction: FlowDirection) {
        let ts = pkt.timestamp_us;
        let len = pkt.length;

        self.packet_lengths.push(len);

        if let Some(prev) = self.last_packet_time {
            self.flow_iats.push(ts.saturating_sub(prev));
        }
        self.last_packet_time = Some(ts);

        match direction {
            FlowDirection::Forward => {
                if let Some(&prev) = self.fwd_timestamps.last() {
                    self.fwd_iats.push(ts.saturating_sub(prev));
                }
                self.fwd_timestamps.push(ts);
                self.fwd_lengths.push(len);
                self.fwd_bytes += len as u64;
            }
            FlowDirection::Backward => {
                if let Some(&prev) = self.bwd_timestamps.last() {
                    self.bwd_iats.push(ts.saturating_sub(prev));
                }
                self.bwd_timestamps.push(ts);
                self.bwd_lengths.push(len);
                self.bwd_bytes += len as u64;
            }
        }

        if let Some(flags) = pkt.tcp_flags {
            self.flags.count(flags);
        }

        // Out-of-order captures never move the clock backwards
        self.last_seen_time = self.last_seen_time.max(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn both_directions_resolve_to_same_key() {
        let a = v4(10, 0, 0, 1);
        let b = v4(10, 0, 0, 2);
        let fwd = PacketRecord::new(0, 60).with_ip(a, b, 6).with_ports(40000, 443);
        let bwd = PacketRecord::new(0, 60).with_ip(b, a, 6).with_ports(443, 40000);
        assert_eq!(FlowKey::resolve(&fwd), FlowKey::resolve(&bwd));

        let key = FlowKey::resolve(&fwd).unwrap();
        assert_eq!(key.addr_low, a);
        assert_eq!(key.port_low, 40000);
    }

    #[test]
    fn address_dominates_port_in_tie_break() {
        // Higher address with the lower port is still the high side
        let key = FlowKey::new(v4(192, 168, 1, 9), v4(10, 0, 0, 1), 1, 65000, 17);
        assert_eq!(key.addr_low, v4(10, 0, 0, 1));
        assert_eq!(key.port_low, 65000);
        assert_eq!(key.port_high, 1);
    }

    #[test]
    fn same_address_falls_back_to_port() {
        let h = v4(127, 0, 0, 1);
        let key = FlowKey::new(h, h, 8080, 3000, 6);
        assert_eq!(key.port_low, 3000);
        assert_eq!(key.direction_of(h, 3000), FlowDirection::Forward);
        assert_eq!(key.direction_of(h, 8080), FlowDirection::Backward);
    }

    #[test]
    fn ipv6_endpoints_are_keyed() {
        let a = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let b = v4(1, 1, 1, 1);
        assert_eq!(FlowKey::new(a, b, 1, 2, 6), FlowKey::new(b, a, 2, 1, 6));
    }

    #[test]
    fn non_ip_packets_have_no_key() {
        assert!(FlowKey::resolve(&PacketRecord::new(0, 42)).is_none());
    }

    #[test]
    fn portless_packets_key_on_port_zero() {
        let pkt = PacketRecord::new(0, 84).with_ip(v4(8, 8, 8, 8), v4(10, 0, 0, 1), 1);
        let key = FlowKey::resolve(&pkt).unwrap();
        assert_eq!((key.port_low, key.port_high), (0, 0));
        assert_eq!((key.addr_low, key.addr_high), (v4(8, 8, 8, 8), v4(10, 0, 0, 1)));
        assert_eq!(key.direction_of(v4(8, 8, 8, 8), 0), FlowDirection::Forward);
        assert_eq!(key.direction_of(v4(10, 0, 0, 1), 0), FlowDirection::Backward);
    }

    #[test]
    fn record_packet_tracks_sequences_and_flags() {
        let mut st = FlowState::new(1_000);
        let p1 = PacketRecord::new(1_000, 100).with_tcp_flags(TcpFlags::SYN);
        let p2 = PacketRecord::new(1_500, 60).with_tcp_flags(TcpFlags::SYN | TcpFlags::ACK);
        let p3 = PacketRecord::new(2_500, 200).with_tcp_flags(TcpFlags::PSH | TcpFlags::ACK | TcpFlags::CWR);
        st.record_packet(&p1, FlowDirection::Forward);
        st.record_packet(&p2, FlowDirection::Backward);
        st.record_packet(&p3, FlowDirection::Forward);

        assert_eq!(st.packet_lengths, vec![100, 60, 200]);
        assert_eq!(st.fwd_lengths, vec![100, 200]);
        assert_eq!(st.bwd_lengths, vec![60]);
        assert_eq!(st.fwd_bytes, 300);
        assert_eq!(st.bwd_bytes, 60);
        assert_eq!(st.flow_iats, vec![500, 1_000]);
        assert_eq!(st.fwd_iats, vec![1_500]);
        assert!(st.bwd_iats.is_empty());
        assert_eq!(st.flags.syn, 2);
        assert_eq!(st.flags.ack, 2);
        assert_eq!(st.flags.psh, 1);
        assert_eq!(st.flags.cwr, 1);
        assert_eq!(st.last_seen_time, 2_500);
        assert_eq!(st.start_time, 1_000);
    }

    #[test]
    fn late_packet_does_not_rewind_last_seen() {
        let mut st = FlowState::new(5_000);
        st.record_packet(&PacketRecord::new(5_000, 10), FlowDirection::Forward);
        st.record_packet(&PacketRecord::new(4_000, 10), FlowDirection::Forward);
        assert_eq!(st.last_seen_time, 5_000);
        assert_eq!(st.flow_iats, vec![0]);
    }
}
