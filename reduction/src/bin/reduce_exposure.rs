//! Reduce one detector exposure into a calibrated record.
//!
//! Reads the four calibration tables under
//! `<data-root>/<obs-id>/odf/<prefix>*`, joins the observation metadata
//! table, and commits `<data-root>/<obs-id>/<prefix>_reduced.dat`.

use std::path::PathBuf;

use clap::Parser;
use reduction::metadata::MetadataTable;
use reduction::record::record_path;
use reduction::reduce_exposure;

#[derive(Parser, Debug)]
#[command(
    name = "reduce_exposure",
    about = "Reduce one X-ray exposure into a calibrated record",
    long_about = None
)]
struct Args {
    /// Root directory holding one subdirectory per observation
    #[arg(long)]
    data_root: PathBuf,

    /// Observation identifier (directory name under the data root)
    #[arg(long)]
    obs_id: String,

    /// Detector+exposure prefix, e.g. mos1S001 or pnS003
    #[arg(long)]
    prefix: String,

    /// CSV table of per-observation metadata scalars
    #[arg(long)]
    metadata: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let metadata = MetadataTable::from_csv(&args.metadata)?;
    let record = reduce_exposure(&args.data_root, &args.obs_id, &args.prefix, &metadata)?;

    let path = record_path(&args.data_root, &args.obs_id, &args.prefix);
    record.write(&path)?;

    println!(
        "{}/{}: {:?} family, {} channels, {:.1} s exposure, {:.4e} sr",
        record.obs_id,
        record.prefix,
        record.family,
        record.counts.len(),
        record.exposure_s,
        record.roi_sr
    );
    println!("record written to {}", path.display());

    Ok(())
}
