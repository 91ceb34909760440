//! End-to-end reduction of one detector exposure.
//!
//! Single-threaded, single-pass: load the four calibration tables, decode
//! and area-fold the response matrix, compute flux and background, join the
//! observation metadata, and emit one calibrated record. Every failure is
//! local to the exposure being processed; nothing is written on failure.

use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use crate::background;
use crate::calibration::{self, CalibrationError};
use crate::flux::{self, FluxError};
use crate::metadata::{MetadataError, MetadataTable};
use crate::record::{self, CalibratedRecord, RecordError};
use crate::response::{self, ResponseError};

/// Any failure while reducing a single exposure.
#[derive(Debug, Error)]
pub enum ReductionError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    Flux(#[from] FluxError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Reduce one exposure to a calibrated record, in memory.
pub fn reduce_exposure(
    data_root: &Path,
    obs_id: &str,
    prefix: &str,
    metadata: &MetadataTable,
) -> Result<CalibratedRecord, ReductionError> {
    let cal = calibration::load(data_root, obs_id, prefix)?;
    info!(
        "{obs_id}/{prefix}: {:?} family, {} channels, {:.1} s exposure",
        cal.family,
        cal.spectrum.counts.len(),
        cal.spectrum.exposure_s
    );

    let mut response = response::decode_matrix(&cal.groups, cal.family, cal.grid.output_channels())?;
    response::fold_effective_area(&mut response, &cal.effective_area)?;

    let roi_sr = flux::roi_solid_angle_sr(cal.spectrum.backscale);
    let flux = flux::differential_flux(&cal.spectrum, &cal.grid, roi_sr)?;

    let bkg = background::effective_counts(&cal.background, cal.family, cal.spectrum.exposure_s);

    let meta = *metadata.lookup(obs_id)?;

    Ok(CalibratedRecord {
        obs_id: obs_id.to_string(),
        prefix: prefix.to_string(),
        family: cal.family,
        counts: cal.spectrum.counts,
        flux,
        response,
        exposure_s: cal.spectrum.exposure_s,
        roi_sr,
        grid: cal.grid,
        background: bkg,
        metadata: meta,
    })
}

/// Reduce one exposure and commit its record under the data root.
///
/// Returns the record path; the record only becomes visible once every
/// field has been computed and serialized successfully.
pub fn reduce_and_write(
    data_root: &Path,
    obs_id: &str,
    prefix: &str,
    metadata: &MetadataTable,
) -> Result<PathBuf, ReductionError> {
    let record = reduce_exposure(data_root, obs_id, prefix, metadata)?;
    let path = record::record_path(data_root, obs_id, prefix);
    record.write(&path)?;
    info!("{obs_id}/{prefix}: record committed to {}", path.display());
    Ok(path)
}
