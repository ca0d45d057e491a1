use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

// Mirrors a forgiving decoder: padding optional, trailing bits ignored
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

static HEX_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]+$").expect("hex label regex"));

static LETTER_DIGIT_PAIRS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][0-9])+$").expect("letter-digit regex"));

const MIN_BASE64_LABEL_LEN: usize = 4;
const MIN_SEQUENTIAL_LABEL_LEN: usize = 6;
const SEQUENTIAL_PAIR_RATIO: f64 = 0.7;

/// Heuristic only: an ASCII label longer than 4 and a multiple of 4 long that
/// decodes once padding is disregarded. A failed decode just means "no".
pub fn is_base64_plausible(label: &str) -> bool {
    if !label.is_ascii() {
        return false;
    }
    let len = label.len();
    if len <= MIN_BASE64_LABEL_LEN || len % 4 != 0 {
        return false;
    }
    // Non-alphabet characters (padding included) are discarded before
    // decoding; a label with none left decodes to nothing and still counts
    let symbols: Vec<u8> = label
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/')
        .collect();
    LENIENT_BASE64.decode(&symbols).is_ok()
}

pub fn is_hex_label(label: &str) -> bool {
    HEX_LABEL.is_match(label)
}

/// `a1b2c3`-style alternation, or runs where at least 70% of adjacent
/// character pairs step up by exactly one code point (`abcdef`, `123456`).
pub fn is_sequential_pattern(label: &str) -> bool {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() < MIN_SEQUENTIAL_LABEL_LEN {
        return false;
    }
    if LETTER_DIGIT_PAIRS.is_match(label) {
        return true;
    }
    let pairs = chars.len() - 1;
    let ascending = chars
        .windows(2)
        .filter(|w| w[1] as u32 == w[0] as u32 + 1)
        .count();
    ascending as f64 >= SEQUENTIAL_PAIR_RATIO * pairs as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_base64_label_is_plausible() {
        // base64("HelloWorldAdminPassword123")
        assert!(is_base64_plausible("SGVsbG9Xb3JsZEFkbWluUGFzc3dvcmQxMjM="));
        assert!(is_base64_plausible("aGVsbG8gd29ybGQh"));
    }

    #[test]
    fn short_or_misaligned_labels_are_not_base64() {
        assert!(!is_base64_plausible("abcd"));
        assert!(!is_base64_plausible("google"));
        assert!(!is_base64_plausible(""));
    }

    #[test]
    fn dictionary_words_of_aligned_length_still_decode() {
        // The check is a proxy, not a proof
        assert!(is_base64_plausible("facebook"));
    }

    #[test]
    fn hyphens_that_leave_a_dangling_symbol_fail() {
        let label = "exfiltration-staging-channel-example";
        assert_eq!(label.len() % 4, 0);
        assert!(!is_base64_plausible(label));
    }

    #[test]
    fn labels_without_alphabet_symbols_decode_to_nothing() {
        assert!(is_base64_plausible("--------"));
        assert!(is_base64_plausible("____===="));
    }

    #[test]
    fn non_ascii_labels_are_not_base64() {
        // 8 bytes but only 7 characters; rejected before any length check
        assert!(!is_base64_plausible("abcdéfg"));
        assert!(!is_base64_plausible("abcdéfgh"));
        assert!(!is_base64_plausible("SGVs\u{fffd}G9Xb3Js"));
    }

    #[test]
    fn hex_labels() {
        assert!(is_hex_label("deadBEEF0042"));
        assert!(is_hex_label("a"));
        assert!(!is_hex_label("cafe-babe"));
        assert!(!is_hex_label("xyz"));
        assert!(!is_hex_label(""));
    }

    #[test]
    fn sequential_patterns() {
        assert!(is_sequential_pattern("a1b2c3"));
        assert!(is_sequential_pattern("abcdefg"));
        assert!(is_sequential_pattern("123456"));
        assert!(!is_sequential_pattern("a1b2c"));
        assert!(!is_sequential_pattern("google"));
        assert!(!is_sequential_pattern("a1b2cc"));
    }

    #[test]
    fn ascending_ratio_threshold() {
        // 4 of 5 pairs ascend: 80%
        assert!(is_sequential_pattern("abcdeZ"));
        // 3 of 5 pairs ascend: 60%
        assert!(!is_sequential_pattern("abcdZZ"));
    }
}
