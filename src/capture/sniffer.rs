use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{Sender, TrySendError};
use pcap::{Active, Capture, Device, PacketHeader};
use serde::Serialize;
use std::sync::{atomic::{AtomicBool, AtomicU64, Ordering}, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::decode::decode_ethernet;
use crate::config::CaptureConfig;
use crate::types::PacketRecord;

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub description: String,
    pub is_up: bool,
}

/// Non-loopback NICs, bridges and virtual adapters.
pub fn list_network_devices() -> Result<Vec<NetworkInterface>> {
    let devices = Device::list()?;

    let want_prefixes = ["en", "eth", "wl", "br-", "docker", "veth", "virbr", "vboxnet"];

    Ok(devices
        .into_iter()
        .filter(|d| want_prefixes.iter().any(|p| d.name.starts_with(p)) && !d.flags.is_loopback())
        .map(|d| {
            let description = d.desc.unwrap_or_else(|| {
                if d.name.starts_with("br-") || d.name == "docker0" { "Docker Bridge".into() }
                else if d.name.starts_with("en") || d.name.starts_with("eth") { "Ethernet Interface".into() }
                else if d.name.starts_with("wl") { "Wi-Fi Interface".into() }
                else { "Network Interface".into() }
            });
            NetworkInterface { name: d.name, description, is_up: d.flags.is_up() }
        })
        .collect())
}

pub struct PacketSniffer {
    sniffer_running: Arc<AtomicBool>,
    sniffer_thread: Option<JoinHandle<()>>,
    capture: Option<Capture<Active>>,
    packet_sender: Sender<PacketRecord>,
    dropped: Arc<AtomicU64>,
}

impl PacketSniffer {
    pub fn new_with_sender(sender: Sender<PacketRecord>) -> Self {
        Self {
            sniffer_running: Arc::new(AtomicBool::new(false)),
            sniffer_thread: None,
            capture: None,
            packet_sender: sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records the processor could not accept.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn init_sniffer(&mut self, config: &CaptureConfig) -> Result<()> {
        let interface = match &config.interface {
            Some(name) => name.clone(),
            None => Device::lookup()?
                .ok_or_else(|| anyhow!("No capture device available"))?
                .name,
        };

        let mut cap = Capture::from_device(interface.as_str())?
            .promisc(config.promiscuous)
            .immediate_mode(true)
            .timeout(config.read_timeout_ms)
            .open()?;

        cap.filter(&config.bpf_filter, true)?;
        info!(%interface, filter = %config.bpf_filter, "capture opened");

        self.capture = Some(cap);
        Ok(())
    }

    pub fn start_sniffer(&mut self) -> Result<()> {
        let cap = self
            .capture
            .take()
            .ok_or_else(|| anyhow!("Capture is not initialized. Call init_sniffer first"))?;

        if self.sniffer_running.swap(true, Ordering::Relaxed) {
            bail!("Sniffer is already running");
        }

        let mut cap = cap.setnonblock()?;

        let running = self.sniffer_running.clone();
        let sender = self.packet_sender.clone();
        let dropped = self.dropped.clone();

        let handle = thread::Builder::new()
            .name("tunnelscope-sniffer".into())
            .spawn(move || {
                debug!("sniffer thread started");
                while running.load(Ordering::Relaxed) {
                    match cap.next_packet() {
                        Ok(packet) => Self::packet_handler(packet.header, packet.data, &sender, &dropped),
                        Err(pcap::Error::TimeoutExpired) => thread::sleep(Duration::from_millis(1)),
                        Err(e) => {
                            error!(error = %e, "capture failed");
                            break;
                        }
                    }
                }
                debug!("sniffer thread exiting");
            })?;

        self.sniffer_thread = Some(handle);
        Ok(())
    }

    pub fn stop_sniffer(&mut self) -> Result<()> {
        if !self.sniffer_running.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        if let Some(handle) = self.sniffer_thread.take() {
            let _ = handle.join();
        }

        self.capture = None;
        info!(dropped = self.dropped_packets(), "sniffer stopped");
        Ok(())
    }

    fn packet_handler(header: &PacketHeader, data: &[u8], sender: &Sender<PacketRecord>, dropped: &AtomicU64) {
        let timestamp = header.ts.tv_sec as u64 * 1_000_000 + header.ts.tv_usec as u64;
        let Some(record) = decode_ethernet(timestamp, header.len, data) else { return };

        match sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => { dropped.fetch_add(1, Ordering::Relaxed); }
            Err(TrySendError::Disconnected(_)) => {
                if dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    warn!("packet channel disconnected");
                }
            }
        }
    }
}

impl Drop for PacketSniffer {
    fn drop(&mut self) {
        let _ = self.stop_sniffer();
    }
}
