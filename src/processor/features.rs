use serde::Serialize;

use super::flow::FlowState;
use crate::types::micros_to_secs;

/// Schema fields the downstream classifier expects but this pipeline does not
/// compute. Always reported as 0.
pub const PLACEHOLDER_FEATURES: [&str; 23] = [
    "fwd_header_length.1",
    "fwd_avg_bytes/bulk",
    "fwd_avg_packets/bulk",
    "fwd_avg_bulk_rate",
    "bwd_avg_bytes/bulk",
    "bwd_avg_packets/bulk",
    "bwd_avg_bulk_rate",
    "subflow_fwd_packets",
    "subflow_fwd_bytes",
    "subflow_bwd_packets",
    "subflow_bwd_bytes",
    "init_win_bytes_forward",
    "init_win_bytes_backward",
    "act_data_pkt_fwd",
    "min_seg_size_forward",
    "active_mean",
    "active_std",
    "active_max",
    "active_min",
    "idle_mean",
    "idle_std",
    "idle_max",
    "idle_min",
];

/// min/max/mean/std of a sample. Everything is 0 for an empty sample and the
/// (population) std is 0 below two samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl SeriesStats {
    pub fn of<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let std = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
        } else {
            0.0
        };
        Self { min, max, mean, std }
    }
}

#[inline]
fn per_second(amount: f64, duration: f64) -> f64 {
    if duration > 0.0 { amount / duration } else { 0.0 }
}

#[inline]
fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

fn lengths(seq: &[u32]) -> SeriesStats {
    SeriesStats::of(seq.iter().map(|&l| l as f64))
}

fn iats(seq: &[u64]) -> SeriesStats {
    SeriesStats::of(seq.iter().map(|&us| micros_to_secs(us)))
}

/// Flow-level statistics for one packet event. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowFeatures {
    pub flow_duration: f64,
    pub total_fwd_packets: u64,
    pub total_bwd_packets: u64,
    pub total_fwd_bytes: u64,
    pub total_bwd_bytes: u64,

    pub fwd_packet_len: SeriesStats,
    pub bwd_packet_len: SeriesStats,
    pub packet_len: SeriesStats,

    pub flow_bytes_per_sec: f64,
    pub flow_packets_per_sec: f64,
    pub fwd_bytes_per_sec: f64,
    pub bwd_bytes_per_sec: f64,
    pub fwd_packets_per_sec: f64,
    pub bwd_packets_per_sec: f64,

    pub flow_iat: SeriesStats,
    pub fwd_iat: SeriesStats,
    pub fwd_iat_total: f64,
    pub bwd_iat: SeriesStats,
    pub bwd_iat_total: f64,

    pub fwd_header_len: u64,
    pub bwd_header_len: u64,

    pub fin_flag_count: u32,
    pub syn_flag_count: u32,
    pub rst_flag_count: u32,
    pub psh_flag_count: u32,
    pub ack_flag_count: u32,
    pub urg_flag_count: u32,
    pub cwr_flag_count: u32,
    pub ece_flag_count: u32,

    pub down_up_ratio: f64,
    pub avg_packet_size: f64,
    pub fwd_segment_size_avg: f64,
    pub bwd_segment_size_avg: f64,
}

impl FlowFeatures {
    /// Derives the feature set from a flow snapshot. Pure: the same state and
    /// `now` always give the same output.
    pub fn compute(flow: &FlowState, now: u64, header_len_estimate: u32) -> Self {
        let duration = micros_to_secs(now.saturating_sub(flow.start_time));

        let fwd_packets = flow.total_fwd_packets() as u64;
        let bwd_packets = flow.total_bwd_packets() as u64;
        let total_packets = fwd_packets + bwd_packets;
        let total_bytes = flow.fwd_bytes + flow.bwd_bytes;

        let down_up_ratio = if flow.fwd_bytes > 0 && flow.bwd_bytes > 0 {
            flow.bwd_bytes as f64 / flow.fwd_bytes as f64
        } else {
            0.0
        };

        Self {
            flow_duration: duration,
            total_fwd_packets: fwd_packets,
            total_bwd_packets: bwd_packets,
            total_fwd_bytes: flow.fwd_bytes,
            total_bwd_bytes: flow.bwd_bytes,

            fwd_packet_len: lengths(&flow.fwd_lengths),
            bwd_packet_len: lengths(&flow.bwd_lengths),
            packet_len: lengths(&flow.packet_lengths),

            flow_bytes_per_sec: per_second(total_bytes as f64, duration),
            flow_packets_per_sec: per_second(total_packets as f64, duration),
            fwd_bytes_per_sec: per_second(flow.fwd_bytes as f64, duration),
            bwd_bytes_per_sec: per_second(flow.bwd_bytes as f64, duration),
            fwd_packets_per_sec: per_second(fwd_packets as f64, duration),
            bwd_packets_per_sec: per_second(bwd_packets as f64, duration),

            flow_iat: iats(&flow.flow_iats),
            fwd_iat: iats(&flow.fwd_iats),
            fwd_iat_total: flow.fwd_iats.iter().map(|&us| micros_to_secs(us)).sum(),
            bwd_iat: iats(&flow.bwd_iats),
            bwd_iat_total: flow.bwd_iats.iter().map(|&us| micros_to_secs(us)).sum(),

            fwd_header_len: fwd_packets * header_len_estimate as u64,
            bwd_header_len: bwd_packets * header_len_estimate as u64,

            fin_flag_count: flow.flags.fin,
            syn_flag_count: flow.flags.syn,
            rst_flag_count: flow.flags.rst,
            psh_flag_count: flow.flags.psh,
            ack_flag_count: flow.flags.ack,
            urg_flag_count: flow.flags.urg,
            cwr_flag_count: flow.flags.cwr,
            ece_flag_count: flow.flags.ece,

            down_up_ratio,
            avg_packet_size: safe_div(total_bytes as f64, total_packets as f64),
            fwd_segment_size_avg: safe_div(flow.fwd_bytes as f64, fwd_packets as f64),
            bwd_segment_size_avg: safe_div(flow.bwd_bytes as f64, bwd_packets as f64),
        }
    }

    /// Flat `(name, value)` list in schema order, placeholders included.
    pub fn fields(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![
            ("flow_duration", self.flow_duration),
            ("total_fwd_packets", self.total_fwd_packets as f64),
            ("total_bwd_packets", self.total_bwd_packets as f64),
            ("total_length_of_fwd_packets", self.total_fwd_bytes as f64),
            ("total_length_of_bwd_packets", self.total_bwd_bytes as f64),
            ("fwd_packet_length_max", self.fwd_packet_len.max),
            ("fwd_packet_length_min", self.fwd_packet_len.min),
            ("fwd_packet_length_mean", self.fwd_packet_len.mean),
            ("fwd_packet_length_std", self.fwd_packet_len.std),
            ("bwd_packet_length_max", self.bwd_packet_len.max),
            ("bwd_packet_length_min", self.bwd_packet_len.min),
            ("bwd_packet_length_mean", self.bwd_packet_len.mean),
            ("bwd_packet_length_std", self.bwd_packet_len.std),
            ("flow_bytes/s", self.flow_bytes_per_sec),
            ("flow_packets/s", self.flow_packets_per_sec),
            ("fwd_bytes/s", self.fwd_bytes_per_sec),
            ("bwd_bytes/s", self.bwd_bytes_per_sec),
            ("flow_iat_mean", self.flow_iat.mean),
            ("flow_iat_std", self.flow_iat.std),
            ("flow_iat_max", self.flow_iat.max),
            ("flow_iat_min", self.flow_iat.min),
            ("fwd_iat_total", self.fwd_iat_total),
            ("fwd_iat_mean", self.fwd_iat.mean),
            ("fwd_iat_std", self.fwd_iat.std),
            ("fwd_iat_max", self.fwd_iat.max),
            ("fwd_iat_min", self.fwd_iat.min),
            ("bwd_iat_total", self.bwd_iat_total),
            ("bwd_iat_mean", self.bwd_iat.mean),
            ("bwd_iat_std", self.bwd_iat.std),
            ("bwd_iat_max", self.bwd_iat.max),
            ("bwd_iat_min", self.bwd_iat.min),
            // Flow-level PSH/URG duplicated per direction for schema compatibility
            ("fwd_psh_flags", self.psh_flag_count as f64),
            ("bwd_psh_flags", self.psh_flag_count as f64),
            ("fwd_urg_flags", self.urg_flag_count as f64),
            ("bwd_urg_flags", self.urg_flag_count as f64),
            ("fwd_header_length", self.fwd_header_len as f64),
            ("bwd_header_length", self.bwd_header_len as f64),
            ("fwd_packets/s", self.fwd_packets_per_sec),
            ("bwd_packets/s", self.bwd_packets_per_sec),
            ("min_packet_length", self.packet_len.min),
            ("max_packet_length", self.packet_len.max),
            ("packet_length_mean", self.packet_len.mean),
            ("packet_length_std", self.packet_len.std),
            ("packet_length_variance", self.packet_len.std * self.packet_len.std),
            ("fin_flag_count", self.fin_flag_count as f64),
            ("syn_flag_count", self.syn_flag_count as f64),
            ("rst_flag_count", self.rst_flag_count as f64),
            ("psh_flag_count", self.psh_flag_count as f64),
            ("ack_flag_count", self.ack_flag_count as f64),
            ("urg_flag_count", self.urg_flag_count as f64),
            ("cwe_flag_count", self.cwr_flag_count as f64),
            ("ece_flag_count", self.ece_flag_count as f64),
            ("down/up_ratio", self.down_up_ratio),
            ("average_packet_size", self.avg_packet_size),
            ("avg_fwd_segment_size", self.fwd_segment_size_avg),
            ("avg_bwd_segment_size", self.bwd_segment_size_avg),
        ];
        out.extend(PLACEHOLDER_FEATURES.iter().map(|&name| (name, 0.0)));
        out
    }
}
