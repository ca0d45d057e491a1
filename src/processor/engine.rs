use crossbeam_channel::{select, tick, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::extractor::FeatureExtractor;
use crate::output::FeatureVector;
use crate::types::{now_micros, NetworkStats, PacketRecord};

/// Capture-time clock for the eviction sweep. Follows packet timestamps and
/// advances with wall time between packets, so replayed captures and live
/// traffic age flows the same way.
#[derive(Debug, Clone, Copy)]
pub struct StreamClock {
    last_ts: Option<u64>,
    seen_at: Instant,
}

impl StreamClock {
    pub fn new() -> Self {
        Self { last_ts: None, seen_at: Instant::now() }
    }

    pub fn observe(&mut self, ts: u64) {
        if self.last_ts.map_or(true, |last| ts >= last) {
            self.last_ts = Some(ts);
            self.seen_at = Instant::now();
        }
    }

    pub fn now(&self) -> u64 {
        match self.last_ts {
            Some(ts) => ts.saturating_add(self.seen_at.elapsed().as_micros() as u64),
            None => now_micros(),
        }
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn processing_loop(
    running: Arc<AtomicBool>,
    packet_rx: Receiver<PacketRecord>,
    extractor: Arc<FeatureExtractor>,
    vector_tx: Sender<FeatureVector>,
    stats_tx: Sender<NetworkStats>,
) {
    let start = Instant::now();

    // Timers for the eviction sweep and the stats snapshot
    let expire_tick = tick(extractor.config().eviction_interval());
    let stats_tick = tick(extractor.config().stats_interval());

    let mut clock = StreamClock::new();
    let mut last_rate = Instant::now();
    let mut pkts_acc: u64 = 0;
    let mut bytes_acc: u64 = 0;

    let mut total_pkts: i64 = 0;
    let mut total_bytes: i64 = 0;
    let mut skipped: i64 = 0;
    let mut dropped: i64 = 0;
    let mut tunneling: i64 = 0;

    loop {
        if !running.load(Ordering::Relaxed) { break; }

        select! {
            recv(packet_rx) -> msg => {
                let Ok(pkt) = msg else {
                    debug!("packet channel closed, engine exiting");
                    break;
                };
                clock.observe(pkt.timestamp_us);
                pkts_acc += 1;
                total_pkts += 1;
                bytes_acc += pkt.length as u64;
                total_bytes += pkt.length as i64;

                match extractor.process(&pkt) {
                    Some(vector) => {
                        if vector.is_dns_tunneling() { tunneling += 1; }
                        // Never block the packet path on delivery
                        match vector_tx.try_send(vector) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => dropped += 1,
                            Err(TrySendError::Disconnected(_)) => {
                                dropped += 1;
                                if dropped == 1 { warn!("feature vector channel disconnected"); }
                            }
                        }
                    }
                    None => skipped += 1,
                }
            },

            recv(expire_tick) -> _ => {
                extractor.evict(clock.now());
            },

            recv(stats_tick) -> _ => {
                let dt = last_rate.elapsed().as_secs_f64().max(1e-6);
                let stats = NetworkStats {
                    flow_count: extractor.flow_count() as i64,
                    tracked_domains: extractor.tracked_domains() as i64,
                    packets_per_second: pkts_acc as f64 / dt,
                    bytes_per_second: bytes_acc as f64 / dt,
                    total_packets: total_pkts,
                    total_bytes,
                    skipped_packets: skipped,
                    dropped_vectors: dropped,
                    tunneling_events: tunneling,
                    uptime_seconds: start.elapsed().as_secs() as i64,
                };
                let _ = stats_tx.try_send(stats);
                pkts_acc = 0;
                bytes_acc = 0;
                last_rate = Instant::now();
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_follows_packets_and_ignores_late_ones() {
        let mut clock = StreamClock::new();
        clock.observe(1_000_000);
        clock.observe(500_000);
        let now = clock.now();
        assert!(now >= 1_000_000);
        assert!(now < 1_000_000 + 60_000_000);
    }

    #[test]
    fn clock_saturates_near_the_end_of_time() {
        let mut clock = StreamClock::new();
        clock.observe(u64::MAX - 1);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(clock.now(), u64::MAX);
    }

    #[test]
    fn clock_without_packets_uses_wall_time() {
        let clock = StreamClock::new();
        assert!(clock.now() > 1_600_000_000_000_000);
    }
}
