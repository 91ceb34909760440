//! Quiescent background extraction with family unit harmonization.
//!
//! The slitless family stores its background as a rate in counts/s, the
//! imaging family directly as counts. Both come with a statistical error in
//! the same units (measured in a smaller region, so the counts are smoothed
//! floats rather than integers and the error is not simply a square root).
//! Downstream consumers always see effective counts.

use crate::calibration::{DetectorFamily, RawBackground};

/// Per-channel background in effective-counts units, family-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundRecord {
    pub counts: Vec<f64>,
    pub counts_err: Vec<f64>,
}

/// Harmonize the raw background columns into effective counts.
pub fn effective_counts(
    raw: &RawBackground,
    family: DetectorFamily,
    exposure_s: f64,
) -> BackgroundRecord {
    match family {
        DetectorFamily::Slitless => BackgroundRecord {
            counts: raw.values.iter().map(|rate| rate * exposure_s).collect(),
            counts_err: raw.errors.iter().map(|err| err * exposure_s).collect(),
        },
        DetectorFamily::Imaging => BackgroundRecord {
            counts: raw.values.clone(),
            counts_err: raw.errors.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rate_family_scales_by_exposure() {
        let raw = RawBackground {
            values: vec![2.0, 0.5],
            errors: vec![0.1, 0.05],
        };
        let bkg = effective_counts(&raw, DetectorFamily::Slitless, 100.0);

        assert_relative_eq!(bkg.counts[0], 200.0, epsilon = 1e-12);
        assert_relative_eq!(bkg.counts[1], 50.0, epsilon = 1e-12);
        assert_relative_eq!(bkg.counts_err[0], 10.0, epsilon = 1e-12);
        assert_relative_eq!(bkg.counts_err[1], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_counts_family_passes_through() {
        let raw = RawBackground {
            values: vec![200.0, 13.25],
            errors: vec![3.5, 1.25],
        };
        let bkg = effective_counts(&raw, DetectorFamily::Imaging, 100.0);

        assert_eq!(bkg.counts, vec![200.0, 13.25]);
        assert_eq!(bkg.counts_err, vec![3.5, 1.25]);
    }
}
