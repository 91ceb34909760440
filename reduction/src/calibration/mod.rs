//! Loading and validation of the four per-exposure calibration tables.
//!
//! One detector exposure is described by four files under
//! `<data_root>/<obs_id>/odf/`:
//!
//! - `<prefix>-obj.pi`: science spectrum (per-channel counts, exposure
//!   time, region-of-interest basis value)
//! - `<prefix>.arf`: effective area per input energy bin
//! - `<prefix>.rmf`: group-encoded response matrix and output energy grid
//! - `<prefix>-back.pi`: quiescent background spectrum
//!
//! The loader performs format validation only (column presence, row-count
//! consistency between tables); all physics happens downstream.

mod table;

use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use table::CalTable;

/// Errors that can occur while opening or validating calibration tables.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("missing calibration file: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    #[error("table {table} has no column {column}")]
    MissingColumn { table: String, column: String },

    #[error("{}: extension {ext} is not a binary table", path.display())]
    NotATable { path: PathBuf, ext: String },

    #[error("row count mismatch: {left} has {left_rows} rows, {right} has {right_rows}")]
    RowCountMismatch {
        left: String,
        left_rows: usize,
        right: String,
        right_rows: usize,
    },
}

/// The two detector families, distinguished by how their response groups
/// and background spectra are stored.
///
/// Detected exactly once at load time from the shape of the
/// first-channel-offset column, then threaded through the decoder and the
/// background extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorFamily {
    /// Full-frame imaging family: one response group per input bin at most
    /// (scalar offset/length columns), background stored as counts.
    Imaging,
    /// Slitless-readout family: several response groups per input bin
    /// (vector offset/length columns), background stored as a rate.
    Slitless,
}

impl DetectorFamily {
    /// Family selection from the per-row width of the first-channel-offset
    /// column: a vector column means the slitless encoding.
    fn from_offset_width(width: usize) -> Self {
        if width > 1 {
            DetectorFamily::Slitless
        } else {
            DetectorFamily::Imaging
        }
    }
}

/// Raw per-channel science spectrum plus exposure bookkeeping.
#[derive(Debug, Clone)]
pub struct SpectrumRecord {
    /// Raw counts per readout channel.
    pub counts: Vec<i64>,
    /// Exposure time in seconds, not vignetting corrected.
    pub exposure_s: f64,
    /// Region-of-interest size in pixel-area units, as stored.
    pub backscale: f64,
}

/// Input and output energy bin edges of the response matrix, in keV.
///
/// The two grids may differ in cardinality and spacing.
#[derive(Debug, Clone)]
pub struct EnergyGrid {
    pub input_lo: Vec<f64>,
    pub input_hi: Vec<f64>,
    pub output_lo: Vec<f64>,
    pub output_hi: Vec<f64>,
}

impl EnergyGrid {
    pub fn input_bins(&self) -> usize {
        self.input_lo.len()
    }

    pub fn output_channels(&self) -> usize {
        self.output_lo.len()
    }
}

/// Group-encoded sparse response representation, exactly as stored.
///
/// For input bin `i`, `group_counts[i]` contiguous output-channel runs are
/// described by offset/length pairs, and the run values are consumed in
/// group order from bin `i`'s row of `values`. Offset/length rows are
/// `group_width` wide (1 in the scalar layout) and value rows are
/// `value_width` wide.
#[derive(Debug, Clone)]
pub struct GroupEncoding {
    pub group_counts: Vec<i32>,
    pub first_channels: Vec<i32>,
    pub run_lengths: Vec<i32>,
    pub values: Vec<f64>,
    pub group_width: usize,
    pub value_width: usize,
}

impl GroupEncoding {
    pub fn input_bins(&self) -> usize {
        self.group_counts.len()
    }
}

/// Background columns exactly as stored; units depend on the detector
/// family and are harmonized by the background extractor.
#[derive(Debug, Clone)]
pub struct RawBackground {
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
}

/// Everything read from the four calibration tables for one exposure.
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    pub family: DetectorFamily,
    pub spectrum: SpectrumRecord,
    /// Effective area per input energy bin, cm², vignetting corrected.
    pub effective_area: Vec<f64>,
    pub grid: EnergyGrid,
    pub groups: GroupEncoding,
    pub background: RawBackground,
}

/// Resolved paths of the four calibration tables for one exposure.
#[derive(Debug, Clone)]
pub struct ExposureFiles {
    pub spectrum: PathBuf,
    pub effective_area: PathBuf,
    pub response: PathBuf,
    pub background: PathBuf,
}

impl ExposureFiles {
    /// Resolve the four expected file paths and verify all of them exist.
    pub fn locate(data_root: &Path, obs_id: &str, prefix: &str) -> Result<Self, CalibrationError> {
        let base = data_root.join(obs_id).join("odf");
        let files = Self {
            spectrum: base.join(format!("{prefix}-obj.pi")),
            effective_area: base.join(format!("{prefix}.arf")),
            response: base.join(format!("{prefix}.rmf")),
            background: base.join(format!("{prefix}-back.pi")),
        };
        for path in [
            &files.spectrum,
            &files.effective_area,
            &files.response,
            &files.background,
        ] {
            if !path.is_file() {
                return Err(CalibrationError::MissingFile { path: path.clone() });
            }
        }
        Ok(files)
    }
}

/// Open and validate the calibration tables for one exposure.
///
/// Each file handle is scoped to its own load step and released before the
/// next table is opened, on success and failure paths alike.
pub fn load(data_root: &Path, obs_id: &str, prefix: &str) -> Result<CalibrationSet, CalibrationError> {
    let files = ExposureFiles::locate(data_root, obs_id, prefix)?;
    debug!(
        "loading calibration tables for {obs_id}/{prefix} from {}",
        files.spectrum.parent().unwrap_or(data_root).display()
    );

    let spectrum = load_spectrum(&files.spectrum)?;
    let (grid, groups, family) = load_response(&files.response)?;
    let effective_area = load_effective_area(&files.effective_area)?;
    let background = load_background(&files.background, family)?;

    // Cross-table row-count consistency. Anything that disagrees here would
    // break the decoder or the flux normalization downstream.
    check_rows(
        "effective area",
        effective_area.len(),
        "response input grid",
        grid.input_bins(),
    )?;
    check_rows(
        "science spectrum",
        spectrum.counts.len(),
        "response output grid",
        grid.output_channels(),
    )?;
    check_rows(
        "background spectrum",
        background.values.len(),
        "science spectrum",
        spectrum.counts.len(),
    )?;

    debug!(
        "loaded {:?} exposure: {} input bins, {} output channels, {:.1} s",
        family,
        grid.input_bins(),
        grid.output_channels(),
        spectrum.exposure_s
    );

    Ok(CalibrationSet {
        family,
        spectrum,
        effective_area,
        grid,
        groups,
        background,
    })
}

fn load_spectrum(path: &Path) -> Result<SpectrumRecord, CalibrationError> {
    let mut table = CalTable::open(path)?;
    let counts = table.read_i32("SPECTRUM", "COUNTS")?;
    let exposure_s = table.read_key_f64("SPECTRUM", "EXPOSURE")?;
    let backscale = table.read_key_f64("SPECTRUM", "BACKSCAL")?;
    Ok(SpectrumRecord {
        counts: counts.into_iter().map(i64::from).collect(),
        exposure_s,
        backscale,
    })
}

fn load_effective_area(path: &Path) -> Result<Vec<f64>, CalibrationError> {
    let mut table = CalTable::open(path)?;
    table.read_f64("SPECRESP", "SPECRESP")
}

fn load_response(
    path: &Path,
) -> Result<(EnergyGrid, GroupEncoding, DetectorFamily), CalibrationError> {
    let mut table = CalTable::open(path)?;

    let input_lo = table.read_f64("MATRIX", "ENERG_LO")?;
    let input_hi = table.read_f64("MATRIX", "ENERG_HI")?;
    let output_lo = table.read_f64("EBOUNDS", "E_MIN")?;
    let output_hi = table.read_f64("EBOUNDS", "E_MAX")?;

    let group_width = table.column_repeat("MATRIX", "F_CHAN")?;
    let length_width = table.column_repeat("MATRIX", "N_CHAN")?;
    check_rows(
        "first-channel offsets per bin",
        group_width,
        "run lengths per bin",
        length_width,
    )?;
    let value_width = table.column_repeat("MATRIX", "MATRIX")?;

    let groups = GroupEncoding {
        group_counts: table.read_i32("MATRIX", "N_GRP")?,
        first_channels: table.read_i32("MATRIX", "F_CHAN")?,
        run_lengths: table.read_i32("MATRIX", "N_CHAN")?,
        values: table.read_f64("MATRIX", "MATRIX")?,
        group_width,
        value_width,
    };

    let family = DetectorFamily::from_offset_width(group_width);

    let grid = EnergyGrid {
        input_lo,
        input_hi,
        output_lo,
        output_hi,
    };

    Ok((grid, groups, family))
}

fn load_background(path: &Path, family: DetectorFamily) -> Result<RawBackground, CalibrationError> {
    let mut table = CalTable::open(path)?;
    // The slitless family stores a rate, the imaging family stores
    // (smoothed, non-integer) counts. Either way the statistical error
    // shares the value column's units.
    let value_column = match family {
        DetectorFamily::Slitless => "RATE",
        DetectorFamily::Imaging => "COUNTS",
    };
    Ok(RawBackground {
        values: table.read_f64("SPECTRUM", value_column)?,
        errors: table.read_f64("SPECTRUM", "STAT_ERR")?,
    })
}

fn check_rows(
    left: &str,
    left_rows: usize,
    right: &str,
    right_rows: usize,
) -> Result<(), CalibrationError> {
    if left_rows != right_rows {
        return Err(CalibrationError::RowCountMismatch {
            left: left.to_string(),
            left_rows,
            right: right.to_string(),
            right_rows,
        });
    }
    Ok(())
}
