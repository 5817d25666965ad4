//! ESQ exposure sequences.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::job::file_safe;

static EXPOSURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<Exposure>\s*([0-9]*\.?[0-9]+)\s*</Exposure>").expect("static regex")
});

/// Scale every `<Exposure>` of a sequence by `(target_ratio / source_ratio)²`.
///
/// Scaled exposures are rounded to the nearest whole second. The sequence
/// is returned unchanged when either ratio is not positive.
pub fn adjust_exposures(sequence: &str, source_ratio: f64, target_ratio: f64) -> String {
    if !(source_ratio > 0.0 && target_ratio > 0.0) {
        return sequence.to_string();
    }
    let factor = (target_ratio / source_ratio).powi(2);
    EXPOSURE
        .replace_all(sequence, |caps: &Captures| {
            let value: f64 = caps[1].parse().unwrap_or(0.0);
            let scaled = (value * factor).round();
            format!("<Exposure>{scaled}</Exposure>")
        })
        .into_owned()
}

/// Exposure values of a sequence, in document order.
pub fn exposures(sequence: &str) -> Vec<f64> {
    EXPOSURE
        .captures_iter(sequence)
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}

/// File name of the sequence for a capture target: `m_31.esq` for `M 31`.
pub fn sequence_file_name(target: &str) -> String {
    format!("{}.esq", file_safe(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEQ: &str = "<SequenceQueue version='2.1'>\
        <Job><Exposure>300</Exposure><Filter>L</Filter></Job>\
        <Job><Exposure>120.5</Exposure><Filter>Ha</Filter></Job>\
        </SequenceQueue>";

    #[test]
    fn scales_by_square_of_ratio() {
        // f/5 leader, f/7 follower: factor 1.96
        let adjusted = adjust_exposures(SEQ, 5.0, 7.0);
        assert_eq!(exposures(&adjusted), vec![588.0, 236.0]);
        assert!(adjusted.contains("<Filter>Ha</Filter>"));
    }

    #[test]
    fn faster_follower_shortens_exposures() {
        let adjusted = adjust_exposures(SEQ, 8.0, 4.0);
        assert_eq!(exposures(&adjusted), vec![75.0, 30.0]);
    }

    #[test]
    fn non_positive_ratio_leaves_sequence_unchanged() {
        assert_eq!(adjust_exposures(SEQ, 0.0, 7.0), SEQ);
        assert_eq!(adjust_exposures(SEQ, 5.0, -1.0), SEQ);
        assert_eq!(adjust_exposures(SEQ, f64::NAN, 5.0), SEQ);
    }

    #[test]
    fn equal_ratios_only_round() {
        let adjusted = adjust_exposures(SEQ, 5.6, 5.6);
        assert_eq!(exposures(&adjusted), vec![300.0, 121.0]);
    }

    #[test]
    fn bias_and_short_frames_round_to_zero() {
        let seq = "<Job><Exposure>0</Exposure></Job><Job><Exposure>0.4</Exposure></Job>";
        assert_eq!(exposures(&adjust_exposures(seq, 5.0, 5.0)), vec![0.0, 0.0]);
        assert_eq!(exposures(&adjust_exposures(seq, 5.0, 7.0)), vec![0.0, 1.0]);
    }

    #[test]
    fn sequence_file_names_are_file_safe() {
        assert_eq!(sequence_file_name("M31"), "m31.esq");
        assert_eq!(sequence_file_name("NGC 7000-North"), "ngc_7000_north.esq");
    }
}
