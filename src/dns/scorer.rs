use serde::Serialize;
use std::fmt;

use super::analyzer::DnsFeatures;

pub const TUNNELING_SCORE_THRESHOLD: u32 = 3;
const CONFIDENCE_FULL_SCORE: f64 = 6.0;

/// A single tunneling indicator. Each one is an independent rule with a fixed
/// weight; the verdict sums the weights of every rule that fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Finding {
    HighEntropySubdomain,
    VeryLongDomain,
    HighQueryFrequency,
    Base64Encoding,
    HexEncoding,
    ManySubdomains,
    SequentialPattern,
    LongSubdomains,
}

impl Finding {
    pub const ALL: [Finding; 8] = [
        Finding::HighEntropySubdomain,
        Finding::VeryLongDomain,
        Finding::HighQueryFrequency,
        Finding::Base64Encoding,
        Finding::HexEncoding,
        Finding::ManySubdomains,
        Finding::SequentialPattern,
        Finding::LongSubdomains,
    ];

    pub fn weight(self) -> u32 {
        match self {
            Finding::HighEntropySubdomain => 2,
            Finding::VeryLongDomain => 2,
            Finding::HighQueryFrequency => 2,
            Finding::Base64Encoding => 3,
            Finding::HexEncoding => 2,
            Finding::ManySubdomains => 1,
            Finding::SequentialPattern => 2,
            Finding::LongSubdomains => 1,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Finding::HighEntropySubdomain => "high-entropy subdomain",
            Finding::VeryLongDomain => "very long domain",
            Finding::HighQueryFrequency => "high query frequency",
            Finding::Base64Encoding => "base64 encoding",
            Finding::HexEncoding => "hex encoding",
            Finding::ManySubdomains => "many subdomains",
            Finding::SequentialPattern => "sequential pattern",
            Finding::LongSubdomains => "long subdomains",
        }
    }

    /// Whether this rule fires for `f`. Thresholds are strict.
    pub fn applies(self, f: &DnsFeatures) -> bool {
        match self {
            Finding::HighEntropySubdomain => f.max_subdomain_entropy > 3.5,
            Finding::VeryLongDomain => f.domain_length > 80,
            Finding::HighQueryFrequency => f.queries_per_minute > 20,
            Finding::Base64Encoding => f.base64_subdomain_ratio > 0.2,
            Finding::HexEncoding => f.hex_subdomain_ratio > 0.3,
            Finding::ManySubdomains => f.subdomain_count > 3,
            Finding::SequentialPattern => f.sequential_subdomain_ratio > 0.2,
            Finding::LongSubdomains => f.subdomain_length.mean > 25.0,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TunnelingVerdict {
    pub is_tunneling: bool,
    pub score: u32,
    pub confidence: f64,
    pub reasons: Vec<Finding>,
}

/// Every rule that fires, in rule order.
pub fn findings(features: &DnsFeatures) -> Vec<Finding> {
    Finding::ALL
        .iter()
        .copied()
        .filter(|rule| rule.applies(features))
        .collect()
}

/// Scores a DNS feature set. Stateless.
pub fn score(features: &DnsFeatures) -> TunnelingVerdict {
    let reasons = findings(features);
    let score: u32 = reasons.iter().map(|r| r.weight()).sum();
    TunnelingVerdict {
        is_tunneling: score >= TUNNELING_SCORE_THRESHOLD,
        score,
        confidence: (score as f64 / CONFIDENCE_FULL_SCORE).min(1.0),
        reasons,
    }
}
