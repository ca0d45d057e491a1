use crossbeam_channel::{never, select, tick, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FeatureSink, FeatureVector};
use crate::types::NetworkStats;

/// Drains finished vectors into the sinks. Runs on its own thread so a slow
/// or failing collaborator never stalls packet processing.
pub fn publisher_loop(
    running: Arc<AtomicBool>,
    vector_rx: Receiver<FeatureVector>,
    mut stats_rx: Receiver<NetworkStats>,
    mut sinks: Vec<Box<dyn FeatureSink>>,
) {
    let emit_tick = tick(Duration::from_millis(250));
    let mut latest: Option<NetworkStats> = None;
    let mut stats_closed = false;

    loop {
        if !running.load(Ordering::Relaxed) { break; }

        select! {
            recv(vector_rx) -> msg => {
                match msg {
                    Ok(vector) => {
                        for sink in sinks.iter_mut() {
                            if let Err(e) = sink.deliver(&vector) {
                                warn!(sink = sink.name(), error = %e, "feature delivery failed");
                            }
                        }
                    }
                    Err(_) => {
                        debug!("vector channel closed, publisher exiting");
                        break;
                    }
                }
            }
            recv(stats_rx) -> msg => {
                match msg {
                    Ok(s) => latest = Some(s),
                    Err(_) => stats_closed = true,
                }
            }
            recv(emit_tick) -> _ => {
                if let Some(s) = latest.take() {
                    for sink in sinks.iter_mut() {
                        if let Err(e) = sink.publish_stats(&s) {
                            warn!(sink = sink.name(), error = %e, "stats delivery failed");
                        }
                    }
                }
            }
        }

        // Stats producer gone; keep serving vectors
        if stats_closed {
            stats_rx = never();
            stats_closed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PacketMeta;
    use crate::processor::{FlowFeatures, FlowKey};
    use crate::types::PacketRecord;
    use anyhow::anyhow;
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;
    use std::net::{IpAddr, Ipv4Addr};
    use std::thread;

    struct Recording {
        seen: Arc<Mutex<Vec<u64>>>,
        stats: Arc<Mutex<Vec<NetworkStats>>>,
    }

    impl FeatureSink for Recording {
        fn name(&self) -> &str { "recording" }

        fn deliver(&mut self, vector: &FeatureVector) -> anyhow::Result<()> {
            self.seen.lock().push(vector.timestamp_us);
            Ok(())
        }

        fn publish_stats(&mut self, stats: &NetworkStats) -> anyhow::Result<()> {
            self.stats.lock().push(stats.clone());
            Ok(())
        }
    }

    struct Failing;

    impl FeatureSink for Failing {
        fn name(&self) -> &str { "failing" }

        fn deliver(&mut self, _vector: &FeatureVector) -> anyhow::Result<()> {
            Err(anyhow!("collaborator down"))
        }
    }

    fn vector(ts: u64) -> FeatureVector {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let pkt = PacketRecord::new(ts, 60).with_ip(ip, ip, 17).with_ports(1, 2);
        FeatureVector {
            key: FlowKey::new(ip, ip, 1, 2, 17),
            packet: PacketMeta::of(ts, &pkt).unwrap(),
            timestamp_us: ts,
            flow: FlowFeatures::default(),
            dns: None,
            verdict: None,
        }
    }

    #[test]
    fn failing_sink_does_not_starve_the_others() {
        let running = Arc::new(AtomicBool::new(true));
        let (vtx, vrx) = unbounded();
        let (stx, srx) = unbounded();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn FeatureSink>> = vec![
            Box::new(Failing),
            Box::new(Recording { seen: seen.clone(), stats: stats.clone() }),
        ];

        let handle = {
            let running = running.clone();
            thread::spawn(move || publisher_loop(running, vrx, srx, sinks))
        };

        for ts in 0..3 {
            vtx.send(vector(ts)).unwrap();
        }
        stx.send(NetworkStats { flow_count: 7, ..Default::default() }).unwrap();
        // Dropping the vector sender ends the loop once drained
        thread::sleep(Duration::from_millis(400));
        drop(vtx);
        handle.join().unwrap();

        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(stats.lock().first().map(|s| s.flow_count), Some(7));
    }
}
