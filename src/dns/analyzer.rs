use serde::Serialize;
use std::collections::HashSet;

use super::encoding::{is_base64_plausible, is_hex_label, is_sequential_pattern};
use super::entropy::shannon_entropy;
use super::frequency::{base_domain, DomainFrequencyTable, QueryFrequency};
use crate::processor::SeriesStats;
use crate::types::DnsQuery;

/// Labels this short are skipped when averaging per-label entropy.
const MIN_ENTROPY_LABEL_LEN: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DnsFeatures {
    pub query_length: u32,
    pub query_type: u16,
    pub response_code: u8,

    // Structure
    pub domain_length: u32,
    pub subdomain_count: u32,
    pub numeric_ratio: f64,
    pub uppercase_ratio: f64,
    pub special_char_ratio: f64,

    // Entropy
    pub domain_entropy: f64,
    pub avg_subdomain_entropy: f64,
    pub max_subdomain_entropy: f64,

    // Encoding
    pub base64_subdomain_ratio: f64,
    pub hex_subdomain_ratio: f64,
    pub sequential_subdomain_ratio: f64,

    // Frequency
    pub queries_per_minute: u64,
    pub total_query_count: u64,

    // Label statistics
    pub subdomain_length: SeriesStats,
    pub unique_subdomain_ratio: f64,
}

impl DnsFeatures {
    pub fn fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("dns_query_length", self.query_length as f64),
            ("dns_query_type", self.query_type as f64),
            ("dns_response_code", self.response_code as f64),
            ("domain_length", self.domain_length as f64),
            ("subdomain_count", self.subdomain_count as f64),
            ("max_subdomain_length", self.subdomain_length.max),
            ("numeric_ratio", self.numeric_ratio),
            ("uppercase_ratio", self.uppercase_ratio),
            ("special_char_ratio", self.special_char_ratio),
            ("domain_entropy", self.domain_entropy),
            ("avg_subdomain_entropy", self.avg_subdomain_entropy),
            ("max_subdomain_entropy", self.max_subdomain_entropy),
            ("base64_subdomain_ratio", self.base64_subdomain_ratio),
            ("hex_subdomain_ratio", self.hex_subdomain_ratio),
            ("sequential_subdomain_ratio", self.sequential_subdomain_ratio),
            ("queries_per_minute", self.queries_per_minute as f64),
            ("total_query_count", self.total_query_count as f64),
            ("avg_subdomain_length", self.subdomain_length.mean),
            ("min_subdomain_length", self.subdomain_length.min),
            ("subdomain_length_std", self.subdomain_length.std),
            ("unique_subdomain_ratio", self.unique_subdomain_ratio),
        ]
    }
}

#[inline]
fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { count as f64 / total as f64 }
}

struct Structure {
    domain_length: u32,
    subdomain_count: u32,
    numeric_ratio: f64,
    uppercase_ratio: f64,
    special_char_ratio: f64,
}

fn structure(domain: &str, labels: &[&str]) -> Structure {
    let (mut len, mut digits, mut upper, mut special) = (0usize, 0usize, 0usize, 0usize);
    for c in domain.chars() {
        len += 1;
        if c.is_ascii_digit() { digits += 1; }
        if c.is_uppercase() { upper += 1; }
        if !c.is_alphanumeric() && c != '.' { special += 1; }
    }
    Structure {
        domain_length: len as u32,
        subdomain_count: labels.len().saturating_sub(1) as u32,
        numeric_ratio: ratio(digits, len),
        uppercase_ratio: ratio(upper, len),
        special_char_ratio: ratio(special, len),
    }
}

/// (domain, average label, max label) entropy.
fn entropies(domain: &str, labels: &[&str]) -> (f64, f64, f64) {
    let per_label: Vec<f64> = labels
        .iter()
        .filter(|l| l.chars().count() > MIN_ENTROPY_LABEL_LEN)
        .map(|l| shannon_entropy(l))
        .collect();
    let avg = if per_label.is_empty() {
        0.0
    } else {
        per_label.iter().sum::<f64>() / per_label.len() as f64
    };
    let max = per_label.iter().copied().fold(0.0, f64::max);
    (shannon_entropy(domain), avg, max)
}

/// Ratio of labels matching `test`.
fn label_ratio(labels: &[&str], test: fn(&str) -> bool) -> f64 {
    ratio(labels.iter().filter(|l| test(l)).count(), labels.len())
}

/// Derives structural, entropy, encoding, frequency and label features from
/// DNS query names. Owns the per-base-domain frequency table.
#[derive(Debug)]
pub struct DnsAnalyzer {
    frequency: DomainFrequencyTable,
}

impl DnsAnalyzer {
    pub fn new(shard_count: usize, window_us: u64) -> Self {
        Self { frequency: DomainFrequencyTable::new(shard_count, window_us) }
    }

    pub fn frequency(&self) -> &DomainFrequencyTable {
        &self.frequency
    }

    /// Analyzes one query observed at `now` (microseconds). Records the query
    /// against its base domain, so repeated calls advance the counters.
    pub fn analyze(&self, query: &DnsQuery, now: u64) -> DnsFeatures {
        let domain = query.name.trim_end_matches('.');
        let freq = self.frequency.record_query(base_domain(domain), now);
        Self::features_for(domain, query, freq)
    }

    fn features_for(domain: &str, query: &DnsQuery, freq: QueryFrequency) -> DnsFeatures {
        let labels: Vec<&str> = domain.split('.').collect();
        let s = structure(domain, &labels);
        let (domain_entropy, avg_subdomain_entropy, max_subdomain_entropy) =
            entropies(domain, &labels);
        let distinct: HashSet<&str> = labels.iter().copied().collect();

        DnsFeatures {
            query_length: query.name.chars().count() as u32,
            query_type: query.qtype,
            response_code: query.rcode,

            domain_length: s.domain_length,
            subdomain_count: s.subdomain_count,
            numeric_ratio: s.numeric_ratio,
            uppercase_ratio: s.uppercase_ratio,
            special_char_ratio: s.special_char_ratio,

            domain_entropy,
            avg_subdomain_entropy,
            max_subdomain_entropy,

            base64_subdomain_ratio: label_ratio(&labels, is_base64_plausible),
            hex_subdomain_ratio: label_ratio(&labels, is_hex_label),
            sequential_subdomain_ratio: label_ratio(&labels, is_sequential_pattern),

            queries_per_minute: freq.in_window,
            total_query_count: freq.total,

            subdomain_length: SeriesStats::of(labels.iter().map(|l| l.chars().count() as f64)),
            unique_subdomain_ratio: ratio(distinct.len(), labels.len()),
        }
    }
}
