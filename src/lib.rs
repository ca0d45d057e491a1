//! Per-packet flow and DNS feature extraction with a heuristic DNS tunneling
//! scorer, for feeding traffic classifiers.
//!
//! The synchronous entry point is [`FeatureExtractor`]; [`FeatureProcessor`]
//! wraps it in a capture-to-sink thread pipeline.

pub mod capture;
pub mod classifier;
pub mod config;
pub mod dns;
pub mod output;
pub mod processor;
pub mod types;

pub use config::{ConfigError, ExtractorConfig};
pub use dns::{DnsFeatures, Finding, TunnelingVerdict};
pub use output::{ChannelSink, FeatureSink, FeatureValue, FeatureVector, PacketMeta};
pub use processor::{EvictionReport, FeatureExtractor, FeatureProcessor, FlowFeatures, FlowKey};
pub use types::{DnsQuery, NetworkStats, PacketRecord};
