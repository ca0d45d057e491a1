use anyhow::{bail, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use tracing::info;

use super::engine;
use super::extractor::FeatureExtractor;
use crate::config::ExtractorConfig;
use crate::output::{publisher, FeatureSink};
use crate::types::PacketRecord;

/// Threaded runtime around [`FeatureExtractor`]: a processing thread fed by
/// the packet channel and a publisher thread feeding the sinks.
pub struct FeatureProcessor {
    running: Arc<AtomicBool>,
    processing_thread: Option<JoinHandle<()>>,
    publisher_thread: Option<JoinHandle<()>>,
    packet_tx: Sender<PacketRecord>,
    packet_rx: Receiver<PacketRecord>,
    extractor: Arc<FeatureExtractor>,
}

impl FeatureProcessor {
    pub fn new(config: ExtractorConfig) -> Self {
        let (packet_tx, packet_rx) = unbounded();
        Self {
            running: Arc::new(AtomicBool::new(false)),
            processing_thread: None,
            publisher_thread: None,
            packet_tx,
            packet_rx,
            extractor: Arc::new(FeatureExtractor::new(config)),
        }
    }

    pub fn get_sender(&self) -> Sender<PacketRecord> { self.packet_tx.clone() }

    pub fn extractor(&self) -> Arc<FeatureExtractor> { self.extractor.clone() }

    pub fn is_running(&self) -> bool { self.running.load(Ordering::Relaxed) }

    pub fn start_processor(&mut self, sinks: Vec<Box<dyn FeatureSink>>) -> Result<()> {
        if self.running.swap(true, Ordering::Relaxed) {
            bail!("Processor is already running");
        }

        let capacity = self.extractor.config().output_queue_capacity;
        let (vector_tx, vector_rx) = bounded(capacity);
        let (stats_tx, stats_rx) = bounded(16);

        let processing = {
            let running = self.running.clone();
            let rx = self.packet_rx.clone();
            let extractor = self.extractor.clone();
            thread::Builder::new()
                .name("tunnelscope-engine".into())
                .spawn(move || engine::processing_loop(running, rx, extractor, vector_tx, stats_tx))?
        };

        let publisher = {
            let running = self.running.clone();
            thread::Builder::new()
                .name("tunnelscope-publisher".into())
                .spawn(move || publisher::publisher_loop(running, vector_rx, stats_rx, sinks))?
        };

        self.processing_thread = Some(processing);
        self.publisher_thread = Some(publisher);
        info!(capacity, "feature processor started");
        Ok(())
    }

    pub fn stop_processor(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::Relaxed) {
            bail!("Processor isn't running");
        }

        if let Some(h) = self.processing_thread.take() { let _ = h.join(); }
        if let Some(h) = self.publisher_thread.take() { let _ = h.join(); }
        info!("feature processor stopped");
        Ok(())
    }
}

impl Drop for FeatureProcessor {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop_processor();
        }
    }
}
