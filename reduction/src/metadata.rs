//! External per-observation astrophysical metadata.
//!
//! The metadata table ships as a CSV keyed by observation identifier, with
//! the two line-of-sight integral factors and the galactic sky coordinates
//! of each pointing. The upstream table is integer-keyed, which silently
//! strips leading zeros from identifiers, so keys are normalized to the
//! canonical 10-digit zero-padded form on load and on lookup.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read metadata table: {0}")]
    Table(#[from] csv::Error),

    #[error("no metadata entry for observation {obs_id}")]
    NotFound { obs_id: String },
}

/// Geometric and astrophysical scalars for one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationMetadata {
    /// Galactic line-of-sight integral factor, keV/cm².
    pub dfac_gal: f64,
    /// Extragalactic line-of-sight integral factor, keV/cm².
    pub dfac_eg: f64,
    /// Galactic longitude of the pointing, degrees.
    pub gal_l: f64,
    /// Galactic latitude of the pointing, degrees.
    pub gal_b: f64,
}

#[derive(Debug, Deserialize)]
struct MetadataRow {
    obs_id: String,
    dfac_gal: f64,
    dfac_eg: f64,
    gal_l: f64,
    gal_b: f64,
}

/// The full metadata table, indexed by canonical observation identifier.
#[derive(Debug, Clone)]
pub struct MetadataTable {
    entries: HashMap<String, ObservationMetadata>,
}

impl MetadataTable {
    /// Load the table from CSV with columns
    /// `obs_id,dfac_gal,dfac_eg,gal_l,gal_b`.
    pub fn from_csv(path: &Path) -> Result<Self, MetadataError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut entries = HashMap::new();
        for row in reader.deserialize() {
            let row: MetadataRow = row?;
            entries.insert(
                canonical_obs_id(&row.obs_id),
                ObservationMetadata {
                    dfac_gal: row.dfac_gal,
                    dfac_eg: row.dfac_eg,
                    gal_l: row.gal_l,
                    gal_b: row.gal_b,
                },
            );
        }
        debug!("loaded metadata for {} observations", entries.len());
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up one observation, normalizing the identifier first.
    pub fn lookup(&self, obs_id: &str) -> Result<&ObservationMetadata, MetadataError> {
        let canonical = canonical_obs_id(obs_id);
        self.entries
            .get(&canonical)
            .ok_or(MetadataError::NotFound { obs_id: canonical })
    }
}

/// Canonical fixed-width observation identifier: 10 digits, zero-padded.
pub fn canonical_obs_id(raw: &str) -> String {
    format!("{raw:0>10}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_table() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "obs_id,dfac_gal,dfac_eg,gal_l,gal_b").unwrap();
        // Leading zero already stripped by the upstream integer keying
        writeln!(file, "123456789,3.2e22,1.1e22,120.5,-35.25").unwrap();
        writeln!(file, "9876543210,5.0e21,2.5e21,10.0,80.0").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_stripped_and_padded_ids_resolve_identically() {
        let file = sample_table();
        let table = MetadataTable::from_csv(file.path()).unwrap();

        let stripped = table.lookup("123456789").unwrap();
        let padded = table.lookup("0123456789").unwrap();
        assert_eq!(stripped, padded);
        assert_eq!(stripped.dfac_gal, 3.2e22);
        assert_eq!(stripped.gal_b, -35.25);
    }

    #[test]
    fn test_full_width_id_lookup() {
        let file = sample_table();
        let table = MetadataTable::from_csv(file.path()).unwrap();

        let meta = table.lookup("9876543210").unwrap();
        assert_eq!(meta.gal_l, 10.0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unknown_observation_is_reported() {
        let file = sample_table();
        let table = MetadataTable::from_csv(file.path()).unwrap();

        let err = table.lookup("0000000042").unwrap_err();
        match err {
            MetadataError::NotFound { obs_id } => assert_eq!(obs_id, "0000000042"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_canonical_obs_id_padding() {
        assert_eq!(canonical_obs_id("123456789"), "0123456789");
        assert_eq!(canonical_obs_id("0123456789"), "0123456789");
        assert_eq!(canonical_obs_id("42"), "0000000042");
    }
}
