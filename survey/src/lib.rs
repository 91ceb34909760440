//! Bookkeeping around the per-exposure reduction pipeline.
//!
//! Two concerns live here, both deliberately outside the core pipeline:
//! extracting the list of reducible science exposures from each
//! observation's pipeline summary report, and scanning a whole data root
//! to rank finished calibrated records by exposure time while collecting
//! the exposures that never produced one.

pub mod ranking;
pub mod summary;

pub use ranking::{scan_data_root, RankedExposure, RankingError, SurveyScan};
pub use summary::{parse_summary, science_prefixes, ScienceExposure, SummaryError};
