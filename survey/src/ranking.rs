//! Batch bookkeeping over finished calibrated records.
//!
//! Walks a data root of per-observation directories, checks every expected
//! record against the exposure lists, and returns two explicit sequences:
//! the finished exposures ranked by exposure time, and the identifiers of
//! exposures whose record is absent. Record presence is the success
//! signal; the reduction pipeline commits records atomically, so a record
//! that exists is complete.

use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use reduction::record::{self, read_exposure_seconds};

use crate::summary::{self, SummaryError};

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("data root I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    ExposureList(#[from] SummaryError),

    #[error("ranking output error: {0}")]
    Output(#[from] csv::Error),
}

/// One finished exposure with the exposure time read back from its record.
#[derive(Debug, Clone, Serialize)]
pub struct RankedExposure {
    pub obs_id: String,
    pub prefix: String,
    pub exposure_s: f64,
}

impl RankedExposure {
    /// Combined observation+detector identifier, e.g. `0123456789mos1S001`.
    pub fn key(&self) -> String {
        format!("{}{}", self.obs_id, self.prefix)
    }
}

/// Outcome of a full data root scan.
#[derive(Debug, Clone, Default)]
pub struct SurveyScan {
    /// Finished exposures, longest exposure time first.
    pub ranked: Vec<RankedExposure>,
    /// Observation+prefix keys whose record is absent or unreadable.
    pub missing: Vec<String>,
}

/// Scan every observation directory under the data root.
///
/// Observation directories are the entries whose name is a 10-digit
/// identifier; anything else under the root is ignored.
pub fn scan_data_root(data_root: &Path) -> Result<SurveyScan, RankingError> {
    let obs_id_re = Regex::new(r"^[0-9]{10}$").unwrap();

    let mut obs_ids: Vec<String> = fs::read_dir(data_root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| obs_id_re.is_match(name))
        .collect();
    obs_ids.sort();
    debug!("scanning {} observation directories", obs_ids.len());

    let mut scan = SurveyScan::default();
    for obs_id in obs_ids {
        let obs_dir = data_root.join(&obs_id);
        for prefix in summary::read_exposure_list(&obs_dir)? {
            let path = record::record_path(data_root, &obs_id, &prefix);
            if !path.is_file() {
                scan.missing.push(format!("{obs_id}{prefix}"));
                continue;
            }
            match read_exposure_seconds(&path) {
                Ok(exposure_s) => scan.ranked.push(RankedExposure {
                    obs_id: obs_id.clone(),
                    prefix,
                    exposure_s,
                }),
                Err(err) => {
                    warn!("unreadable record {}: {err}", path.display());
                    scan.missing.push(format!("{obs_id}{prefix}"));
                }
            }
        }
    }

    // Longest exposure first; ties broken by key so the order is stable
    scan.ranked.sort_by(|a, b| {
        b.exposure_s
            .total_cmp(&a.exposure_s)
            .then_with(|| b.key().cmp(&a.key()))
    });

    Ok(scan)
}

/// Write the ranked exposures as CSV with columns
/// `obs_id,prefix,exposure_s`.
pub fn write_ranked_csv(path: &Path, ranked: &[RankedExposure]) -> Result<(), RankingError> {
    let mut writer = csv::Writer::from_path(path)?;
    for exposure in ranked {
        writer.serialize(exposure)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the missing-exposure keys, one per line.
pub fn write_missing_list(path: &Path, missing: &[String]) -> Result<(), RankingError> {
    let mut contents = missing.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(path, contents)?;
    Ok(())
}
