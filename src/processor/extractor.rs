use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, trace};

use super::features::FlowFeatures;
use super::flow::{FlowKey, FlowState};
use super::table::FlowTable;
use crate::config::ExtractorConfig;
use crate::dns::{self, DnsAnalyzer};
use crate::output::{FeatureVector, PacketMeta};
use crate::types::PacketRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub flows_removed: usize,
    pub domains_removed: usize,
}

/// The synchronous packet pipeline: key resolution, flow update, flow
/// features, and for DNS queries the structural analysis and verdict.
///
/// `process` may be called from several threads; packets of the same flow are
/// serialized on the flow's shard lock.
#[derive(Debug)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
    flows: FlowTable,
    dns: DnsAnalyzer,
    next_packet_id: AtomicU64,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let flows = FlowTable::new(config.shard_count);
        let dns = DnsAnalyzer::new(config.shard_count, config.dns_window_us());
        Self { config, flows, dns, next_packet_id: AtomicU64::new(0) }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Runs one packet through the pipeline, using its capture timestamp as
    /// the current time. Packets without a network layer yield `None`.
    pub fn process(&self, pkt: &PacketRecord) -> Option<FeatureVector> {
        let Some(key) = FlowKey::resolve(pkt) else {
            trace!(len = pkt.length, "skipping packet without network layer");
            return None;
        };
        let packet = PacketMeta::of(self.next_packet_id.fetch_add(1, Ordering::Relaxed), pkt)?;
        let (src, src_port) = (packet.src, packet.src_port);
        let now = pkt.timestamp_us;

        let mut shard = self.flows.lock_shard(&key);
        let flow = shard.lookup_or_create(key, now);
        flow.record_packet(pkt, key.direction_of(src, src_port));
        let flow_features = FlowFeatures::compute(flow, now, self.config.header_len_estimate);

        // Still under the shard lock: the DNS window is order dependent too
        let (dns_features, verdict) = match &pkt.dns {
            Some(query) => {
                let features = self.dns.analyze(query, now);
                let verdict = dns::score(&features);
                if verdict.is_tunneling {
                    info!(
                        domain = %query.name,
                        score = verdict.score,
                        confidence = verdict.confidence,
                        reasons = ?verdict.reasons,
                        "possible DNS tunneling"
                    );
                }
                (Some(features), Some(verdict))
            }
            None => (None, None),
        };
        drop(shard);

        Some(FeatureVector {
            key,
            packet,
            timestamp_us: now,
            flow: flow_features,
            dns: dns_features,
            verdict,
        })
    }

    /// Sweeps idle flows and idle domain records. Caller scheduled.
    pub fn evict(&self, now: u64) -> EvictionReport {
        let report = EvictionReport {
            flows_removed: self.flows.evict(now, self.config.flow_timeout_us()),
            domains_removed: self.dns.frequency().evict(now, self.config.domain_idle_timeout_us()),
        };
        if report.flows_removed > 0 || report.domains_removed > 0 {
            trace!(?report, "eviction sweep");
        }
        report
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn tracked_domains(&self) -> usize {
        self.dns.frequency().len()
    }

    pub fn flow_snapshot(&self, key: &FlowKey) -> Option<FlowState> {
        self.flows.snapshot(key)
    }

    /// Recomputes features for a stored flow without mutating it.
    pub fn flow_features(&self, key: &FlowKey, now: u64) -> Option<FlowFeatures> {
        let shard = self.flows.lock_shard(key);
        shard
            .get(key)
            .map(|flow| FlowFeatures::compute(flow, now, self.config.header_len_estimate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    const SEC: u64 = 1_000_000;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 0, last))
    }

    #[test]
    fn non_ip_packet_is_skipped() {
        let ex = FeatureExtractor::new(ExtractorConfig::default());
        assert!(ex.process(&PacketRecord::new(0, 60)).is_none());
        assert_eq!(ex.flow_count(), 0);
    }

    #[test]
    fn replies_land_in_the_same_flow() {
        let ex = FeatureExtractor::new(ExtractorConfig::default());
        let out = PacketRecord::new(0, 100).with_ip(ip(2), ip(1), 6).with_ports(50000, 80);
        let back = PacketRecord::new(SEC, 400).with_ip(ip(1), ip(2), 6).with_ports(80, 50000);
        ex.process(&out).unwrap();
        let v = ex.process(&back).unwrap();
        assert_eq!(ex.flow_count(), 1);
        // 192.168.0.1:80 is the low side, so the reply is forward
        assert_eq!(v.flow.total_fwd_packets, 1);
        assert_eq!(v.flow.total_bwd_packets, 1);
        assert_eq!(v.flow.total_fwd_bytes, 400);
        assert_eq!(v.flow.flow_duration, 1.0);
        assert_eq!(v.flow.flow_bytes_per_sec, 500.0);
    }

    #[test]
    fn dns_packets_carry_a_verdict() {
        let ex = FeatureExtractor::new(ExtractorConfig::default());
        let pkt = PacketRecord::new(0, 80)
            .with_ip(ip(9), ip(53), 17)
            .with_ports(5353, 53)
            .with_dns("google.com.", 1, 0);
        let v = ex.process(&pkt).unwrap();
        let verdict = v.verdict.unwrap();
        assert!(!verdict.is_tunneling);
        assert_eq!(v.dns.unwrap().total_query_count, 1);
        assert_eq!(ex.tracked_domains(), 1);
    }

    #[test]
    fn query_burst_raises_frequency_finding() {
        let ex = FeatureExtractor::new(ExtractorConfig::default());
        let mut last = None;
        for i in 0..21u64 {
            let pkt = PacketRecord::new(i * 1_000, 90)
                .with_ip(ip(9), ip(53), 17)
                .with_ports(40000 + i as u16, 53)
                .with_dns(&format!("q{i}.cdn.example.net"), 1, 0);
            last = ex.process(&pkt);
        }
        let v = last.unwrap();
        assert_eq!(v.dns.as_ref().unwrap().queries_per_minute, 21);
        assert!(v.verdict.unwrap().reasons.contains(&dns::Finding::HighQueryFrequency));
    }

    #[test]
    fn eviction_uses_configured_timeouts() {
        let cfg = ExtractorConfig { flow_timeout_secs: 10, domain_idle_timeout_secs: 30, ..Default::default() };
        let ex = FeatureExtractor::new(cfg);
        let dns_pkt = PacketRecord::new(0, 80)
            .with_ip(ip(9), ip(53), 17)
            .with_ports(1111, 53)
            .with_dns("a.example.org", 1, 0);
        ex.process(&dns_pkt);
        let tcp = PacketRecord::new(5 * SEC, 60).with_ip(ip(3), ip(4), 6).with_ports(1, 2);
        ex.process(&tcp);

        let r = ex.evict(12 * SEC);
        assert_eq!(r, EvictionReport { flows_removed: 1, domains_removed: 0 });
        assert_eq!(ex.flow_count(), 1);

        let r = ex.evict(31 * SEC);
        assert_eq!(r, EvictionReport { flows_removed: 1, domains_removed: 1 });
        assert_eq!(ex.flow_count(), 0);
        assert_eq!(ex.tracked_domains(), 0);
    }

    #[test]
    fn recomputing_features_is_idempotent() {
        let ex = FeatureExtractor::new(ExtractorConfig::default());
        let pkt = PacketRecord::new(SEC, 1200).with_ip(ip(1), ip(2), 6).with_ports(443, 60000);
        let key = FlowKey::resolve(&pkt).unwrap();
        ex.process(&pkt);
        ex.process(&PacketRecord::new(3 * SEC, 52).with_ip(ip(2), ip(1), 6).with_ports(60000, 443));

        let a = ex.flow_features(&key, 4 * SEC).unwrap();
        let b = ex.flow_features(&key, 4 * SEC).unwrap();
        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
        assert_eq!(ex.flow_snapshot(&key).unwrap().packet_lengths, vec![1200, 52]);
    }

    #[test]
    fn concurrent_packets_on_one_flow_are_all_counted() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 250;
        let ex = FeatureExtractor::new(ExtractorConfig { shard_count: 4, ..Default::default() });
        let base = 1_000 * SEC;
        let done = AtomicBool::new(false);

        let ids: Vec<u64> = thread::scope(|s| {
            // Sweeps with a current clock must never take the live flow
            let sweeper = s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    assert_eq!(ex.evict(base + SEC).flows_removed, 0);
                    thread::yield_now();
                }
            });

            let workers: Vec<_> = (0..THREADS)
                .map(|t| {
                    let ex = &ex;
                    s.spawn(move || {
                        (0..PER_THREAD)
                            .map(|i| {
                                let ts = base + t * PER_THREAD + i;
                                let pkt = if (t + i) % 2 == 0 {
                                    PacketRecord::new(ts, 100).with_ip(ip(1), ip(2), 6).with_ports(443, 50000)
                                } else {
                                    PacketRecord::new(ts, 60).with_ip(ip(2), ip(1), 6).with_ports(50000, 443)
                                };
                                ex.process(&pkt).unwrap().packet.packet_id
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let ids = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
            done.store(true, Ordering::Relaxed);
            sweeper.join().unwrap();
            ids
        });

        let total = (THREADS * PER_THREAD) as usize;
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), total);

        let key = FlowKey::new(ip(1), ip(2), 443, 50000, 6);
        let flow = ex.flow_snapshot(&key).unwrap();
        assert_eq!(ex.flow_count(), 1);
        assert_eq!(flow.total_fwd_packets() + flow.total_bwd_packets(), total);
        assert_eq!(flow.total_fwd_packets(), total / 2);
        assert_eq!(flow.packet_lengths.len(), total);
        assert_eq!(flow.flow_iats.len(), total - 1);
        assert_eq!(flow.fwd_bytes + flow.bwd_bytes, (total / 2) as u64 * 160);
    }

    #[test]
    fn packet_ids_follow_processing_order() {
        let ex = FeatureExtractor::new(ExtractorConfig::default());
        let pkt = PacketRecord::new(0, 60).with_ip(ip(5), ip(6), 17).with_ports(9, 10);
        assert!(ex.process(&PacketRecord::new(0, 60)).is_none());
        let a = ex.process(&pkt).unwrap();
        let b = ex.process(&pkt).unwrap();
        assert_eq!((a.packet.packet_id, b.packet.packet_id), (0, 1));
        assert_eq!(b.packet.src, ip(5));
        assert_eq!(b.packet.dst_port, 10);
    }
}
