pub mod feature_processor;
pub mod engine;
mod extractor;
mod features;
mod flow;
mod table;

pub use extractor::{EvictionReport, FeatureExtractor};
pub use feature_processor::FeatureProcessor;
pub use features::{FlowFeatures, SeriesStats, PLACEHOLDER_FEATURES};
pub use flow::{FlagCounters, FlowDirection, FlowKey, FlowState};
pub use table::{FlowShard, FlowTable};
