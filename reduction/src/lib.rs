//! Detector response reconstruction and spectral calibration for single
//! X-ray telescope exposures.
//!
//! The pipeline turns the four per-exposure calibration/science tables into
//! one compact calibrated record: it decodes the group-encoded sparse
//! response matrix, folds in the effective area, converts raw counts into
//! differential flux, harmonizes the quiescent background across the two
//! detector families, joins per-observation astrophysical metadata, and
//! commits everything atomically as a write-once binary record.
//!
//! Batch orchestration across many observations is deliberately external;
//! see the companion `survey` crate.

pub mod background;
pub mod calibration;
pub mod flux;
pub mod metadata;
pub mod pipeline;
pub mod record;
pub mod response;

pub use calibration::DetectorFamily;
pub use pipeline::{reduce_and_write, reduce_exposure, ReductionError};
pub use record::CalibratedRecord;
