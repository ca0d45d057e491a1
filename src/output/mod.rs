pub mod publisher;

use anyhow::anyhow;
use crossbeam_channel::{Sender, TrySendError};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::net::IpAddr;

use crate::dns::{DnsFeatures, TunnelingVerdict};
use crate::processor::{FlowFeatures, FlowKey};
use crate::types::{NetworkStats, PacketRecord};

pub use publisher::publisher_loop;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Flag(bool),
}

impl FeatureValue {
    pub fn as_f64(self) -> f64 {
        match self {
            FeatureValue::Number(v) if v.is_finite() => v,
            FeatureValue::Number(_) => 0.0,
            FeatureValue::Flag(b) => if b { 1.0 } else { 0.0 },
        }
    }
}

impl Serialize for FeatureValue {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match *self {
            FeatureValue::Number(v) => s.serialize_f64(v),
            FeatureValue::Flag(b) => s.serialize_bool(b),
        }
    }
}

#[inline]
fn as_f32(v: f64) -> f32 {
    let f = v as f32;
    if f.is_finite() { f } else { 0.0 }
}

/// The packet behind a vector, oriented as captured rather than as keyed.
/// Serialized alongside the features; never part of the model row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    pub packet_id: u64,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub length: u32,
}

impl PacketMeta {
    /// `None` for packets without a network layer.
    pub fn of(packet_id: u64, pkt: &PacketRecord) -> Option<Self> {
        let ip = pkt.ip?;
        let (src_port, dst_port) = pkt.ports.map_or((0, 0), |p| (p.src, p.dst));
        Some(Self {
            packet_id,
            src: ip.src,
            dst: ip.dst,
            src_port,
            dst_port,
            protocol: ip.protocol,
            length: pkt.length,
        })
    }
}

/// Everything derived for one packet event. Built fresh per packet and never
/// stored by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub key: FlowKey,
    pub packet: PacketMeta,
    pub timestamp_us: u64,
    pub flow: FlowFeatures,
    pub dns: Option<DnsFeatures>,
    pub verdict: Option<TunnelingVerdict>,
}

impl FeatureVector {
    pub fn is_dns_tunneling(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.is_tunneling)
    }

    /// Flat, ordered schema. Absent DNS features and verdict fall back to
    /// zero/false so the field set is identical for every packet.
    pub fn fields(&self) -> Vec<(&'static str, FeatureValue)> {
        let mut out: Vec<(&'static str, FeatureValue)> = self
            .flow
            .fields()
            .into_iter()
            .map(|(k, v)| (k, FeatureValue::Number(v)))
            .collect();

        let dns_fields = match &self.dns {
            Some(dns) => dns.fields(),
            None => DnsFeatures::default().fields(),
        };
        out.extend(dns_fields.into_iter().map(|(k, v)| (k, FeatureValue::Number(v))));

        let (score, confidence, is_tunneling) = self
            .verdict
            .as_ref()
            .map_or((0.0, 0.0, false), |v| (v.score as f64, v.confidence, v.is_tunneling));
        out.push(("dns_tunneling_score", FeatureValue::Number(score)));
        out.push(("dns_tunneling_confidence", FeatureValue::Number(confidence)));
        out.push(("is_dns_tunneling", FeatureValue::Flag(is_tunneling)));
        out
    }

    pub fn get(&self, name: &str) -> Option<FeatureValue> {
        self.fields().into_iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    /// Numeric row in schema order for model input.
    pub fn to_f32_row(&self) -> Vec<f32> {
        self.fields().into_iter().map(|(_, v)| as_f32(v.as_f64())).collect()
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let fields = self.fields();
        let p = &self.packet;
        let mut map = s.serialize_map(Some(fields.len() + 7))?;
        map.serialize_entry("packet_id", &p.packet_id)?;
        map.serialize_entry("src", &p.src)?;
        map.serialize_entry("dst", &p.dst)?;
        map.serialize_entry("source_port", &p.src_port)?;
        map.serialize_entry("destination_port", &p.dst_port)?;
        map.serialize_entry("protocol", &p.protocol)?;
        map.serialize_entry("packet_length", &p.length)?;
        for (k, v) in fields {
            map.serialize_entry(k, &v)?;
        }
        map.end()
    }
}

/// Collaborator that consumes finished feature vectors (classifier, alerting,
/// dashboards). Runs off the packet path; an error is logged and dropped.
pub trait FeatureSink: Send {
    fn name(&self) -> &str;

    fn deliver(&mut self, vector: &FeatureVector) -> anyhow::Result<()>;

    fn publish_stats(&mut self, _stats: &NetworkStats) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forwards vectors over a bounded channel without ever blocking.
pub struct ChannelSink {
    name: String,
    tx: Sender<FeatureVector>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, tx: Sender<FeatureVector>) -> Self {
        Self { name: name.into(), tx }
    }
}

impl FeatureSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, vector: &FeatureVector) -> anyhow::Result<()> {
        match self.tx.try_send(vector.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!("{} queue full", self.name)),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("{} disconnected", self.name)),
        }
    }
}
