//! Thin access layer over the self-describing tabular calibration files.
//!
//! Wraps the FITS binary-table interface with the handful of operations the
//! loader needs: scalar header keys, whole columns, and column shape
//! introspection. The underlying file handle is released when the value is
//! dropped, so callers get deterministic handle scoping for free.

use std::path::{Path, PathBuf};

use fitsio::hdu::HduInfo;
use fitsio::FitsFile;

use super::CalibrationError;

/// An open calibration table file.
pub struct CalTable {
    file: FitsFile,
    path: PathBuf,
}

impl CalTable {
    pub fn open(path: &Path) -> Result<Self, CalibrationError> {
        let file = FitsFile::open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Per-row element count of a column: 1 for scalar columns, the fixed
    /// vector width for array-valued columns.
    pub fn column_repeat(&mut self, ext: &str, column: &str) -> Result<usize, CalibrationError> {
        let hdu = self.file.hdu(ext)?;
        match &hdu.info {
            HduInfo::TableInfo {
                column_descriptions,
                ..
            } => column_descriptions
                .iter()
                .find(|c| c.name == column)
                .map(|c| c.data_type.repeat)
                .ok_or_else(|| CalibrationError::MissingColumn {
                    table: self.describe(ext),
                    column: column.to_string(),
                }),
            _ => Err(CalibrationError::NotATable {
                path: self.path.clone(),
                ext: ext.to_string(),
            }),
        }
    }

    /// Read a floating point column, flattened row-major for vector columns.
    pub fn read_f64(&mut self, ext: &str, column: &str) -> Result<Vec<f64>, CalibrationError> {
        self.require_column(ext, column)?;
        let hdu = self.file.hdu(ext)?;
        Ok(hdu.read_col(&mut self.file, column)?)
    }

    /// Read an integer column, flattened row-major for vector columns.
    pub fn read_i32(&mut self, ext: &str, column: &str) -> Result<Vec<i32>, CalibrationError> {
        self.require_column(ext, column)?;
        let hdu = self.file.hdu(ext)?;
        Ok(hdu.read_col(&mut self.file, column)?)
    }

    /// Read a scalar header keyword from the named extension.
    pub fn read_key_f64(&mut self, ext: &str, key: &str) -> Result<f64, CalibrationError> {
        let hdu = self.file.hdu(ext)?;
        Ok(hdu.read_key(&mut self.file, key)?)
    }

    fn require_column(&mut self, ext: &str, column: &str) -> Result<(), CalibrationError> {
        // column_repeat already reports a missing column precisely
        self.column_repeat(ext, column).map(|_| ())
    }

    fn describe(&self, ext: &str) -> String {
        format!("{}[{ext}]", self.path.display())
    }
}
