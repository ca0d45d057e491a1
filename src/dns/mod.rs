pub mod analyzer;
pub mod encoding;
pub mod entropy;
pub mod frequency;
pub mod scorer;

pub use analyzer::{DnsAnalyzer, DnsFeatures};
pub use entropy::shannon_entropy;
pub use frequency::{base_domain, DomainFrequencyRecord, DomainFrequencyTable, QueryFrequency};
pub use scorer::{score, Finding, TunnelingVerdict, TUNNELING_SCORE_THRESHOLD};
