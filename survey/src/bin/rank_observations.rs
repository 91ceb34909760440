//! Rank all finished calibrated records under a data root.
//!
//! Scans every observation directory, reads the exposure time back from
//! each record, and writes the ranked list plus the exposures whose record
//! is absent.

use std::path::PathBuf;

use clap::Parser;
use survey::ranking;

#[derive(Parser, Debug)]
#[command(
    name = "rank_observations",
    about = "Rank finished exposures by exposure time across a data root",
    long_about = None
)]
struct Args {
    /// Root directory holding one subdirectory per observation
    #[arg(long)]
    data_root: PathBuf,

    /// Output CSV of finished exposures, longest first
    #[arg(long)]
    ranked_csv: PathBuf,

    /// Output list of exposures with no record
    #[arg(long)]
    missing_list: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let scan = ranking::scan_data_root(&args.data_root)?;
    ranking::write_ranked_csv(&args.ranked_csv, &scan.ranked)?;
    ranking::write_missing_list(&args.missing_list, &scan.missing)?;

    println!(
        "{} records ranked, {} exposures missing",
        scan.ranked.len(),
        scan.missing.len()
    );
    for exposure in scan.ranked.iter().take(5) {
        println!("  {:<24} {:>12.1} s", exposure.key(), exposure.exposure_s);
    }
    println!("ranked list written to {}", args.ranked_csv.display());
    println!("missing list written to {}", args.missing_list.display());

    Ok(())
}
