//! Differential flux calculation and region-of-interest normalization.
//!
//! Flux comes out in counts/s/keV/sr. The cm² of collecting area is carried
//! by the response matrix instead, so the two can be recombined downstream.

use thiserror::Error;

use crate::calibration::{EnergyGrid, SpectrumRecord};

#[derive(Debug, Error)]
pub enum FluxError {
    #[error("non-positive exposure ({exposure_s} s) or region size ({roi_sr} sr)")]
    InvalidExposure { exposure_s: f64, roi_sr: f64 },
}

/// Convert a region-of-interest size from its stored pixel-area basis to
/// steradians. The stored value counts detector pixels of 0.05 arcsec side
/// length; the conversion factor is fixed instrument pixel geometry.
pub fn roi_solid_angle_sr(backscale: f64) -> f64 {
    let pixel_side_rad = 0.05 / 3600.0 * std::f64::consts::PI / 180.0;
    backscale * (pixel_side_rad * pixel_side_rad)
}

/// Differential flux per output channel: counts normalized by channel
/// width, exposure time, and region solid angle.
pub fn differential_flux(
    spectrum: &SpectrumRecord,
    grid: &EnergyGrid,
    roi_sr: f64,
) -> Result<Vec<f64>, FluxError> {
    if spectrum.exposure_s <= 0.0 || roi_sr <= 0.0 {
        return Err(FluxError::InvalidExposure {
            exposure_s: spectrum.exposure_s,
            roi_sr,
        });
    }

    let flux = spectrum
        .counts
        .iter()
        .zip(grid.output_lo.iter().zip(grid.output_hi.iter()))
        .map(|(&counts, (&lo, &hi))| counts as f64 / (hi - lo) / spectrum.exposure_s / roi_sr)
        .collect();
    Ok(flux)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_grid() -> EnergyGrid {
        EnergyGrid {
            input_lo: vec![0.1, 0.2],
            input_hi: vec![0.2, 0.3],
            output_lo: vec![0.1, 0.15, 0.25],
            output_hi: vec![0.15, 0.25, 0.30],
        }
    }

    #[test]
    fn test_doubling_exposure_halves_flux() {
        let grid = test_grid();
        let short = SpectrumRecord {
            counts: vec![40, 10, 6],
            exposure_s: 500.0,
            backscale: 0.0,
        };
        let long = SpectrumRecord {
            exposure_s: 1000.0,
            ..short.clone()
        };

        let roi_sr = 2.5e-4;
        let flux_short = differential_flux(&short, &grid, roi_sr).unwrap();
        let flux_long = differential_flux(&long, &grid, roi_sr).unwrap();

        for (s, l) in flux_short.iter().zip(flux_long.iter()) {
            assert_relative_eq!(*s, 2.0 * l, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_flux_normalization_values() {
        let grid = test_grid();
        let spectrum = SpectrumRecord {
            counts: vec![100, 0, 50],
            exposure_s: 1000.0,
            backscale: 0.0,
        };
        let flux = differential_flux(&spectrum, &grid, 0.5).unwrap();

        // 100 counts / 0.05 keV / 1000 s / 0.5 sr
        assert_relative_eq!(flux[0], 4.0, epsilon = 1e-12);
        assert_eq!(flux[1], 0.0);
        // 50 / 0.05 / 1000 / 0.5
        assert_relative_eq!(flux[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_roi_conversion_scales_linearly() {
        let one = roi_solid_angle_sr(1.0);
        assert_relative_eq!(roi_solid_angle_sr(1e9), 1e9 * one, max_relative = 1e-15);
        assert_eq!(roi_solid_angle_sr(0.0), 0.0);
    }

    #[test]
    fn test_roi_conversion_pixel_geometry() {
        // One pixel subtends (0.05 arcsec)^2; a full steradian is the
        // reciprocal number of pixels.
        let arcsec_rad = std::f64::consts::PI / 180.0 / 3600.0;
        let pixel_sr = (0.05 * arcsec_rad) * (0.05 * arcsec_rad);
        assert_relative_eq!(roi_solid_angle_sr(1.0), pixel_sr, max_relative = 1e-15);
        assert_relative_eq!(roi_solid_angle_sr(1.0 / pixel_sr), 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_invalid_exposure_rejected() {
        let grid = test_grid();
        let spectrum = SpectrumRecord {
            counts: vec![1, 2, 3],
            exposure_s: 0.0,
            backscale: 1.0,
        };
        assert!(matches!(
            differential_flux(&spectrum, &grid, 1.0),
            Err(FluxError::InvalidExposure { .. })
        ));

        let spectrum = SpectrumRecord {
            exposure_s: 100.0,
            ..spectrum
        };
        assert!(matches!(
            differential_flux(&spectrum, &grid, -2.0),
            Err(FluxError::InvalidExposure { .. })
        ));
    }
}
