//! The calibrated per-exposure output record.
//!
//! One exposure reduces to one little-endian binary container holding the
//! raw counts, calibrated flux, both energy grids, the harmonized
//! background, the joined metadata scalars, and the dense response matrix
//! as a gzip-compressed block (lossless: the matrix was already thresholded
//! upstream, the compressor only exploits the zero runs).
//!
//! Writes go to a temporary sibling and are committed with an atomic
//! rename, so a half-written record is never observable and the record's
//! presence is a reliable success signal for batch aggregation.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use ndarray::Array2;
use thiserror::Error;

use crate::background::BackgroundRecord;
use crate::calibration::{DetectorFamily, EnergyGrid};
use crate::metadata::ObservationMetadata;

const MAGIC: [u8; 4] = *b"XRED";
const VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a calibrated record (magic {found:?})")]
    BadMagic { found: [u8; 4] },

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u16),

    #[error("unknown detector family tag {0}")]
    BadFamily(u8),

    #[error("identifier is not valid UTF-8")]
    BadIdentifier(#[from] std::string::FromUtf8Error),

    #[error("identifier longer than {} bytes", u16::MAX)]
    IdentifierTooLong,

    #[error("matrix block holds {found} values, expected {expected}")]
    MatrixSize { expected: usize, found: usize },
}

/// Aggregate of every derived quantity for one exposure. Write-once.
#[derive(Debug, Clone)]
pub struct CalibratedRecord {
    pub obs_id: String,
    pub prefix: String,
    pub family: DetectorFamily,
    /// Raw counts per output channel.
    pub counts: Vec<i64>,
    /// Differential flux per output channel, counts/s/keV/sr.
    pub flux: Vec<f64>,
    /// Dense response matrix (output channels × input bins), cm².
    pub response: Array2<f64>,
    pub exposure_s: f64,
    /// Region-of-interest solid angle, steradians.
    pub roi_sr: f64,
    pub grid: EnergyGrid,
    pub background: BackgroundRecord,
    pub metadata: ObservationMetadata,
}

/// Canonical location of an exposure's record under the data root.
pub fn record_path(data_root: &Path, obs_id: &str, prefix: &str) -> PathBuf {
    data_root.join(obs_id).join(format!("{prefix}_reduced.dat"))
}

impl CalibratedRecord {
    /// Serialize the record, committing atomically via a temporary sibling.
    pub fn write(&self, path: &Path) -> Result<(), RecordError> {
        let tmp = tmp_path(path);
        let result = self.write_to(&tmp).and_then(|()| {
            fs::rename(&tmp, path)?;
            Ok(())
        });
        if result.is_err() {
            // Never leave a stale temporary behind a failed write
            let _ = fs::remove_file(&tmp);
        } else {
            debug!("wrote calibrated record to {}", path.display());
        }
        result
    }

    fn write_to(&self, path: &Path) -> Result<(), RecordError> {
        let mut w = BufWriter::new(File::create(path)?);

        w.write_all(&MAGIC)?;
        w.write_u16::<LittleEndian>(VERSION)?;
        w.write_u8(family_tag(self.family))?;
        write_string(&mut w, &self.obs_id)?;
        write_string(&mut w, &self.prefix)?;

        w.write_f64::<LittleEndian>(self.exposure_s)?;
        w.write_f64::<LittleEndian>(self.roi_sr)?;

        let channels = self.counts.len();
        let input_bins = self.grid.input_bins();
        w.write_u32::<LittleEndian>(channels as u32)?;
        w.write_u32::<LittleEndian>(input_bins as u32)?;

        for &c in &self.counts {
            w.write_i64::<LittleEndian>(c)?;
        }
        write_f64_slice(&mut w, &self.flux)?;
        write_f64_slice(&mut w, &self.grid.output_lo)?;
        write_f64_slice(&mut w, &self.grid.output_hi)?;
        write_f64_slice(&mut w, &self.grid.input_lo)?;
        write_f64_slice(&mut w, &self.grid.input_hi)?;
        write_f64_slice(&mut w, &self.background.counts)?;
        write_f64_slice(&mut w, &self.background.counts_err)?;

        w.write_f64::<LittleEndian>(self.metadata.dfac_gal)?;
        w.write_f64::<LittleEndian>(self.metadata.dfac_eg)?;
        w.write_f64::<LittleEndian>(self.metadata.gal_l)?;
        w.write_f64::<LittleEndian>(self.metadata.gal_b)?;

        let compressed = compress_matrix(&self.response)?;
        w.write_u32::<LittleEndian>(self.response.nrows() as u32)?;
        w.write_u32::<LittleEndian>(self.response.ncols() as u32)?;
        w.write_u64::<LittleEndian>(compressed.len() as u64)?;
        w.write_all(&compressed)?;

        w.flush()?;
        Ok(())
    }

    /// Read a record back; counts, flux, and matrix reproduce bit-exactly.
    pub fn read(path: &Path) -> Result<Self, RecordError> {
        let mut r = BufReader::new(File::open(path)?);

        let (family, obs_id, prefix) = read_header(&mut r)?;
        let exposure_s = r.read_f64::<LittleEndian>()?;
        let roi_sr = r.read_f64::<LittleEndian>()?;

        let channels = r.read_u32::<LittleEndian>()? as usize;
        let input_bins = r.read_u32::<LittleEndian>()? as usize;

        let mut counts = Vec::with_capacity(channels);
        for _ in 0..channels {
            counts.push(r.read_i64::<LittleEndian>()?);
        }
        let flux = read_f64_vec(&mut r, channels)?;
        let output_lo = read_f64_vec(&mut r, channels)?;
        let output_hi = read_f64_vec(&mut r, channels)?;
        let input_lo = read_f64_vec(&mut r, input_bins)?;
        let input_hi = read_f64_vec(&mut r, input_bins)?;
        let bkg_counts = read_f64_vec(&mut r, channels)?;
        let bkg_err = read_f64_vec(&mut r, channels)?;

        let metadata = ObservationMetadata {
            dfac_gal: r.read_f64::<LittleEndian>()?,
            dfac_eg: r.read_f64::<LittleEndian>()?,
            gal_l: r.read_f64::<LittleEndian>()?,
            gal_b: r.read_f64::<LittleEndian>()?,
        };

        let matrix_rows = r.read_u32::<LittleEndian>()? as usize;
        let matrix_cols = r.read_u32::<LittleEndian>()? as usize;
        let compressed_len = r.read_u64::<LittleEndian>()? as usize;
        let mut compressed = vec![0u8; compressed_len];
        r.read_exact(&mut compressed)?;
        let response = decompress_matrix(&compressed, matrix_rows, matrix_cols)?;

        Ok(Self {
            obs_id,
            prefix,
            family,
            counts,
            flux,
            response,
            exposure_s,
            roi_sr,
            grid: EnergyGrid {
                input_lo,
                input_hi,
                output_lo,
                output_hi,
            },
            background: BackgroundRecord {
                counts: bkg_counts,
                counts_err: bkg_err,
            },
            metadata,
        })
    }
}

/// Read only the exposure time from a record, for cheap batch ranking.
pub fn read_exposure_seconds(path: &Path) -> Result<f64, RecordError> {
    let mut r = BufReader::new(File::open(path)?);
    read_header(&mut r)?;
    Ok(r.read_f64::<LittleEndian>()?)
}

fn read_header<R: Read>(r: &mut R) -> Result<(DetectorFamily, String, String), RecordError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(RecordError::BadMagic { found: magic });
    }
    let version = r.read_u16::<LittleEndian>()?;
    if version != VERSION {
        return Err(RecordError::UnsupportedVersion(version));
    }
    let family = family_from_tag(r.read_u8()?)?;
    let obs_id = read_string(r)?;
    let prefix = read_string(r)?;
    Ok((family, obs_id, prefix))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn family_tag(family: DetectorFamily) -> u8 {
    match family {
        DetectorFamily::Imaging => 0,
        DetectorFamily::Slitless => 1,
    }
}

fn family_from_tag(tag: u8) -> Result<DetectorFamily, RecordError> {
    match tag {
        0 => Ok(DetectorFamily::Imaging),
        1 => Ok(DetectorFamily::Slitless),
        other => Err(RecordError::BadFamily(other)),
    }
}

fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), RecordError> {
    let len = u16::try_from(s.len()).map_err(|_| RecordError::IdentifierTooLong)?;
    w.write_u16::<LittleEndian>(len)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(r: &mut R) -> Result<String, RecordError> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

fn write_f64_slice<W: Write>(w: &mut W, values: &[f64]) -> Result<(), RecordError> {
    for &v in values {
        w.write_f64::<LittleEndian>(v)?;
    }
    Ok(())
}

fn read_f64_vec<R: Read>(r: &mut R, n: usize) -> Result<Vec<f64>, RecordError> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(r.read_f64::<LittleEndian>()?);
    }
    Ok(values)
}

fn compress_matrix(matrix: &Array2<f64>) -> Result<Vec<u8>, RecordError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    // Logical row-major order, independent of the in-memory layout
    for &v in matrix.iter() {
        encoder.write_f64::<LittleEndian>(v)?;
    }
    Ok(encoder.finish()?)
}

fn decompress_matrix(
    compressed: &[u8],
    rows: usize,
    cols: usize,
) -> Result<Array2<f64>, RecordError> {
    let expected = rows * cols;
    let mut decoder = GzDecoder::new(compressed);
    let mut values = Vec::with_capacity(expected);
    for _ in 0..expected {
        values.push(decoder.read_f64::<LittleEndian>()?);
    }
    // The block must end exactly where the declared shape says it does
    let mut trailing = [0u8; 1];
    if decoder.read(&mut trailing)? != 0 {
        return Err(RecordError::MatrixSize {
            expected,
            found: expected + 1,
        });
    }
    Array2::from_shape_vec((rows, cols), values).map_err(|_| RecordError::MatrixSize {
        expected,
        found: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_record() -> CalibratedRecord {
        CalibratedRecord {
            obs_id: "0123456789".to_string(),
            prefix: "mos1S001".to_string(),
            family: DetectorFamily::Imaging,
            counts: vec![12, 0, 7],
            // Values with non-trivial bit patterns to catch lossy encoding
            flux: vec![0.1, 1.0e-300, 7.25e3],
            response: array![[0.0, 1e-5], [123.456, 0.0], [5.5e-3, 2.0]],
            exposure_s: 14325.75,
            roi_sr: 2.0359e-5,
            grid: EnergyGrid {
                input_lo: vec![0.1, 0.2],
                input_hi: vec![0.2, 0.3],
                output_lo: vec![0.1, 0.15, 0.25],
                output_hi: vec![0.15, 0.25, 0.30],
            },
            background: BackgroundRecord {
                counts: vec![1.5, 0.0, 2.25],
                counts_err: vec![0.5, 0.0, 0.75],
            },
            metadata: ObservationMetadata {
                dfac_gal: 3.2e22,
                dfac_eg: 1.1e22,
                gal_l: 120.5,
                gal_b: -35.25,
            },
        }
    }

    #[test]
    fn test_round_trip_is_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mos1S001_reduced.dat");

        let record = sample_record();
        record.write(&path).unwrap();
        let back = CalibratedRecord::read(&path).unwrap();

        assert_eq!(back.obs_id, record.obs_id);
        assert_eq!(back.prefix, record.prefix);
        assert_eq!(back.family, record.family);
        assert_eq!(back.counts, record.counts);
        // Bit-exact float comparison is intentional here
        assert_eq!(back.flux, record.flux);
        assert_eq!(back.response, record.response);
        assert_eq!(back.exposure_s.to_bits(), record.exposure_s.to_bits());
        assert_eq!(back.roi_sr.to_bits(), record.roi_sr.to_bits());
        assert_eq!(back.grid.output_lo, record.grid.output_lo);
        assert_eq!(back.background.counts, record.background.counts);
        assert_eq!(back.metadata, record.metadata);
    }

    #[test]
    fn test_no_temporary_left_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pnS003_reduced.dat");

        sample_record().write(&path).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["pnS003_reduced.dat".to_string()]);
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        // Target inside a directory that does not exist
        let path = dir.path().join("no_such_dir").join("x_reduced.dat");

        assert!(sample_record().write(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_exposure_seconds_shortcut() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mos2S002_reduced.dat");

        sample_record().write(&path).unwrap();
        let exposure = read_exposure_seconds(&path).unwrap();
        assert_eq!(exposure.to_bits(), 14325.75_f64.to_bits());
    }

    #[test]
    fn test_foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_record.dat");
        std::fs::write(&path, b"PK\x03\x04 definitely a zip").unwrap();

        match CalibratedRecord::read(&path).unwrap_err() {
            RecordError::BadMagic { .. } => {}
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_record_path_layout() {
        let path = record_path(Path::new("/data"), "0123456789", "pnS003");
        assert_eq!(
            path,
            Path::new("/data/0123456789/pnS003_reduced.dat")
        );
    }
}
