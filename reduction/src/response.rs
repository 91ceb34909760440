//! Dense response matrix reconstruction from the group-encoded sparse form.
//!
//! The response table stores, for each input energy bin, a variable number
//! of contiguous output-channel runs. Reconstruction fills each run's slice
//! of the dense column from the bin's flattened value row, zeroes everything
//! outside the runs, clips negligible probabilities to exactly zero, and
//! finally folds in the effective area so the matrix carries cm² units.

use log::debug;
use ndarray::{Array2, ArrayView1};
use thiserror::Error;

use crate::calibration::{DetectorFamily, GroupEncoding};

/// Decoded probabilities strictly below this value are set to exactly zero.
/// The matrix columns are probability densities, so such entries are
/// negligible, and the zero runs compress well in the output record.
pub const NEGLIGIBLE_PROBABILITY: f64 = 1e-5;

/// Errors raised when the group encoding disagrees with itself or with the
/// declared output grid.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error(
        "input bin {bin}: run [{first}, {first}+{length}) leaves the {channels}-channel output grid"
    )]
    RunOutOfBounds {
        bin: usize,
        first: usize,
        length: usize,
        channels: usize,
    },

    #[error("input bin {bin}: groups consume {needed} values but the value row holds {available}")]
    ValuesExhausted {
        bin: usize,
        needed: usize,
        available: usize,
    },

    #[error("input bin {bin}: {groups} groups exceed the per-bin capacity of {capacity}")]
    TooManyGroups {
        bin: usize,
        groups: usize,
        capacity: usize,
    },

    #[error("input bin {bin}: negative group field {field} = {value}")]
    NegativeField {
        bin: usize,
        field: &'static str,
        value: i32,
    },

    #[error("effective area has {area_bins} bins but the matrix has {matrix_bins} input columns")]
    AreaLengthMismatch {
        area_bins: usize,
        matrix_bins: usize,
    },
}

/// Reconstruct the dense (output channels × input bins) response matrix.
///
/// The group layout is fixed by the detector family, chosen once for the
/// whole matrix: the imaging family stores one offset/length pair per input
/// bin, the slitless family a fixed-width array of pairs per bin. Decoded
/// values below [`NEGLIGIBLE_PROBABILITY`] come out as exactly zero.
pub fn decode_matrix(
    groups: &GroupEncoding,
    family: DetectorFamily,
    output_channels: usize,
) -> Result<Array2<f64>, ResponseError> {
    let input_bins = groups.input_bins();
    let mut dense = Array2::<f64>::zeros((output_channels, input_bins));
    let mut column = vec![0.0_f64; output_channels];

    for bin in 0..input_bins {
        column.fill(0.0);
        decode_column(groups, family, bin, &mut column)?;
        clip_negligible(&mut column);
        dense.column_mut(bin).assign(&ArrayView1::from(&column[..]));
    }

    debug!(
        "decoded {}x{} response matrix ({:?} group layout)",
        output_channels, input_bins, family
    );
    Ok(dense)
}

/// Fill one dense column from the bin's groups, without thresholding.
fn decode_column(
    groups: &GroupEncoding,
    family: DetectorFamily,
    bin: usize,
    column: &mut [f64],
) -> Result<(), ResponseError> {
    let group_count = non_negative(groups.group_counts[bin], bin, "group count")?;
    let capacity = match family {
        DetectorFamily::Imaging => 1,
        DetectorFamily::Slitless => groups.group_width,
    };
    if group_count > capacity {
        return Err(ResponseError::TooManyGroups {
            bin,
            groups: group_count,
            capacity,
        });
    }

    let value_row = bin * groups.value_width;
    let mut consumed = 0usize;
    for group in 0..group_count {
        // In the scalar layout the single offset/length pair sits at the
        // bin index itself; in the vector layout pairs are packed at the
        // front of the bin's fixed-width row.
        let pair = match family {
            DetectorFamily::Imaging => bin,
            DetectorFamily::Slitless => bin * groups.group_width + group,
        };
        let first = non_negative(groups.first_channels[pair], bin, "first channel")?;
        let length = non_negative(groups.run_lengths[pair], bin, "run length")?;

        if first + length > column.len() {
            return Err(ResponseError::RunOutOfBounds {
                bin,
                first,
                length,
                channels: column.len(),
            });
        }
        if consumed + length > groups.value_width {
            return Err(ResponseError::ValuesExhausted {
                bin,
                needed: consumed + length,
                available: groups.value_width,
            });
        }

        let src = &groups.values[value_row + consumed..value_row + consumed + length];
        column[first..first + length].copy_from_slice(src);
        consumed += length;
    }

    Ok(())
}

/// Set every value strictly below [`NEGLIGIBLE_PROBABILITY`] to exactly
/// zero. Idempotent: zero is itself below the threshold and maps to zero.
pub fn clip_negligible(column: &mut [f64]) {
    for value in column.iter_mut() {
        if *value < NEGLIGIBLE_PROBABILITY {
            *value = 0.0;
        }
    }
}

/// Scale each input-bin column by its effective area, giving cm² units.
pub fn fold_effective_area(
    matrix: &mut Array2<f64>,
    effective_area: &[f64],
) -> Result<(), ResponseError> {
    if effective_area.len() != matrix.ncols() {
        return Err(ResponseError::AreaLengthMismatch {
            area_bins: effective_area.len(),
            matrix_bins: matrix.ncols(),
        });
    }
    for (bin, &area) in effective_area.iter().enumerate() {
        matrix.column_mut(bin).mapv_inplace(|v| v * area);
    }
    Ok(())
}

fn non_negative(value: i32, bin: usize, field: &'static str) -> Result<usize, ResponseError> {
    usize::try_from(value).map_err(|_| ResponseError::NegativeField { bin, field, value })
}
