//! Extract one observation's reducible science exposures.
//!
//! Reads the observation's pipeline summary report and writes the
//! detector+exposure prefixes to `science_exposures.txt` in the
//! observation directory.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use survey::summary;

#[derive(Parser, Debug)]
#[command(
    name = "list_exposures",
    about = "Extract the reducible science exposures of one observation",
    long_about = None
)]
struct Args {
    /// Root directory holding one subdirectory per observation
    #[arg(long)]
    data_root: PathBuf,

    /// Observation identifier (directory name under the data root)
    #[arg(long)]
    obs_id: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let obs_dir = args.data_root.join(&args.obs_id);
    let report = summary::find_summary_report(&obs_dir)?;
    let html = fs::read_to_string(&report)?;

    let exposures = summary::parse_summary(&html)?;
    let prefixes = summary::science_prefixes(&exposures);
    let list = summary::write_exposure_list(&obs_dir, &prefixes)?;

    println!(
        "{}: {} exposures listed, {} reducible",
        args.obs_id,
        exposures.len(),
        prefixes.len()
    );
    println!("exposure list written to {}", list.display());

    Ok(())
}
