//! Science exposure extraction from pipeline summary reports.
//!
//! Each observation ships an HTML summary report listing its exposures.
//! The exposure table is the first table inside the report's wide-table
//! block; each data row names an instrument, an exposure identifier, and
//! the observing mode. The slitless camera is only reducible in its two
//! full-window modes, so other slitless rows are dropped here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("no pipeline summary report under {}", dir.display())]
    SummaryNotFound { dir: PathBuf },

    #[error("summary I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed summary report: {0}")]
    Malformed(String),
}

/// One row of the exposure table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScienceExposure {
    /// Instrument name, e.g. `MOS1` or `PN`.
    pub instrument: String,
    /// Exposure identifier, e.g. `S001`.
    pub exposure_id: String,
    /// Observing mode string as reported.
    pub mode: String,
}

impl ScienceExposure {
    /// Detector+exposure prefix as used by the calibration file layout,
    /// e.g. `mos1S001` or `pnS003`.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.instrument.to_lowercase(), self.exposure_id)
    }
}

const SLITLESS_INSTRUMENT: &str = "PN";
const IMAGING_INSTRUMENT_STEM: &str = "MOS";
const SLITLESS_ALLOWED_MODES: [&str; 2] = ["PrimeFullWindow", "PrimeFullWindowExten"];

/// Name of the per-observation exposure list written next to the data.
pub const EXPOSURE_LIST_FILE: &str = "science_exposures.txt";

/// Locate the observation's summary report under `<obs_dir>/pps/`.
pub fn find_summary_report(obs_dir: &Path) -> Result<PathBuf, SummaryError> {
    let pps = obs_dir.join("pps");
    let mut candidates: Vec<PathBuf> = fs::read_dir(&pps)
        .map_err(|_| SummaryError::SummaryNotFound { dir: pps.clone() })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains("PPSSUM") && n.ends_with(".HTM"))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or(SummaryError::SummaryNotFound { dir: pps })
}

/// Parse the exposure table out of a summary report.
pub fn parse_summary(html: &str) -> Result<Vec<ScienceExposure>, SummaryError> {
    let start = html
        .find("id=\"widetable\"")
        .ok_or_else(|| SummaryError::Malformed("no wide-table block".to_string()))?;
    let table_re = Regex::new(r"(?s)<table.*?</table>").unwrap();
    let table = table_re
        .find(&html[start..])
        .ok_or_else(|| SummaryError::Malformed("wide-table block holds no table".to_string()))?
        .as_str();

    let row_re = Regex::new(r"(?s)<tr[^>]*>(.*?)</tr>").unwrap();
    let cell_re = Regex::new(r"(?s)<td[^>]*>(.*?)</td>").unwrap();
    let tag_re = Regex::new(r"<[^>]+>").unwrap();

    let mut exposures = Vec::new();
    for row in row_re.captures_iter(table) {
        let body = &row[1];
        // Header rows use <th> cells and yield no <td> captures
        let cells: Vec<String> = cell_re
            .captures_iter(body)
            .map(|cell| tag_re.replace_all(&cell[1], "").trim().to_string())
            .collect();
        if cells.len() < 4 {
            continue;
        }
        // The instrument cell carries a one-letter camera-system prefix,
        // e.g. "EMOS1" or "EPN"
        let Some(instrument) = cells[0].get(1..) else {
            continue;
        };
        exposures.push(ScienceExposure {
            instrument: instrument.to_string(),
            exposure_id: cells[1].clone(),
            mode: cells[3].clone(),
        });
    }

    debug!("summary report lists {} exposures", exposures.len());
    Ok(exposures)
}

/// Keep the exposures the reduction pipeline can process and turn them
/// into detector+exposure prefixes: slitless exposures only in the two
/// full-window modes, imaging exposures in any mode.
pub fn science_prefixes(exposures: &[ScienceExposure]) -> Vec<String> {
    exposures
        .iter()
        .filter(|exposure| {
            if exposure.instrument == SLITLESS_INSTRUMENT {
                SLITLESS_ALLOWED_MODES.contains(&exposure.mode.as_str())
            } else {
                exposure.instrument.starts_with(IMAGING_INSTRUMENT_STEM)
            }
        })
        .map(ScienceExposure::prefix)
        .collect()
}

/// Write the observation's exposure list, one prefix per line.
pub fn write_exposure_list(obs_dir: &Path, prefixes: &[String]) -> Result<PathBuf, SummaryError> {
    let path = obs_dir.join(EXPOSURE_LIST_FILE);
    let mut contents = prefixes.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(&path, contents)?;
    Ok(path)
}

/// Read an observation's exposure list. A missing list means the
/// observation has no reducible exposures.
pub fn read_exposure_list(obs_dir: &Path) -> Result<Vec<String>, SummaryError> {
    let path = obs_dir.join(EXPOSURE_LIST_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(&path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REPORT: &str = r#"
<html><body>
<div id="obs-summary"><table><tr><td>not this one</td></tr></table></div>
<div id="widetable">
<table border="1">
<tr><th>Instrument</th><th>Exposure</th><th>Filter</th><th>Mode</th></tr>
<tr><td>EMOS1</td><td>S001</td><td>Medium</td><td>PrimeFullWindow</td></tr>
<tr><td>EMOS2</td><td>S002</td><td>Medium</td><td>FastUncompressed</td></tr>
<tr><td>EPN</td><td>S003</td><td>Thin1</td><td>PrimeFullWindowExten</td></tr>
<tr><td>EPN</td><td>S004</td><td>Thin1</td><td>PrimeSmallWindow</td></tr>
</table>
</div>
</body></html>
"#;

    #[test]
    fn test_parse_summary_rows() {
        let exposures = parse_summary(SAMPLE_REPORT).unwrap();
        assert_eq!(exposures.len(), 4);
        assert_eq!(exposures[0].instrument, "MOS1");
        assert_eq!(exposures[0].exposure_id, "S001");
        assert_eq!(exposures[2].instrument, "PN");
        assert_eq!(exposures[2].mode, "PrimeFullWindowExten");
    }

    #[test]
    fn test_science_prefixes_filter_slitless_modes() {
        let exposures = parse_summary(SAMPLE_REPORT).unwrap();
        let prefixes = science_prefixes(&exposures);
        // MOS rows pass in any mode; the small-window PN row is dropped
        assert_eq!(prefixes, vec!["mos1S001", "mos2S002", "pnS003"]);
    }

    #[test]
    fn test_report_without_wide_table_is_malformed() {
        let err = parse_summary("<html><table></table></html>").unwrap_err();
        assert!(matches!(err, SummaryError::Malformed(_)));
    }

    #[test]
    fn test_exposure_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let prefixes = vec!["mos1S001".to_string(), "pnS003".to_string()];

        write_exposure_list(dir.path(), &prefixes).unwrap();
        assert_eq!(read_exposure_list(dir.path()).unwrap(), prefixes);
    }

    #[test]
    fn test_missing_exposure_list_means_no_exposures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_exposure_list(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_find_summary_report() {
        let dir = tempfile::tempdir().unwrap();
        let pps = dir.path().join("pps");
        fs::create_dir_all(&pps).unwrap();
        fs::write(pps.join("P0123456789OBX000PPSSUM000.HTM"), "x").unwrap();
        fs::write(pps.join("P0123456789OBX000OTHER0000.HTM"), "x").unwrap();

        let found = find_summary_report(dir.path()).unwrap();
        assert!(found
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("PPSSUM"));
    }

    #[test]
    fn test_missing_summary_report() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_summary_report(dir.path()),
            Err(SummaryError::SummaryNotFound { .. })
        ));
    }
}
