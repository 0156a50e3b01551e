mod catalog;
mod config;
mod dsp;
mod geo;
mod pipeline;
mod recording;
mod report;
mod util;

use anyhow::{Context, Result, bail};
use catalog::MemoryCatalog;
use config::Config;
use recording::repository::FsRepository;
use report::CsvSink;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let cfg = Config::load(&config_path)?;
    let repo = FsRepository::new(&cfg.file_directory, cfg.is_wav_tree);

    if cfg.detection_time.is_some() {
        run_detection(&cfg, &repo)
    } else if cfg.start_date.is_some() {
        run_monitoring(&cfg, &repo)
    } else {
        bail!("config selects no mode: set detection_time or start_date/end_date");
    }
}

fn run_detection(cfg: &Config, repo: &FsRepository) -> Result<()> {
    let directory = cfg
        .csv_destination
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let mut sink = CsvSink::create(&directory, "meteor_detect").context("creating csv report")?;
    let report = pipeline::detection::run(cfg, repo, &mut sink)?;

    println!("detections around {}:", report.instant);
    for station in &report.stations {
        println!(
            "  {} antenna {}: {} meteor(s)",
            station.station,
            station.antenna,
            station.candidates.len()
        );
    }
    println!(
        "{} candidate(s) total, {} file(s) skipped, report written to {}",
        report.total_candidates(),
        report.skipped_files,
        sink.path.display()
    );
    Ok(())
}

fn run_monitoring(cfg: &Config, repo: &FsRepository) -> Result<()> {
    // Standalone runs use the in-memory catalog; a relational store can be
    // dropped in behind the same trait.
    let mut catalog = MemoryCatalog::new();
    for station in &cfg.stations {
        catalog.register_system(station, 1);
    }

    let report = pipeline::monitoring::run(cfg, repo, &mut catalog)?;
    println!(
        "monitoring done: {} computed, {} reused, {} skipped, {} persisted",
        report.computed, report.reused, report.skipped, report.persisted
    );
    if report.warnings.is_empty() {
        println!("no PSD variation warnings");
    } else {
        println!("{}", report::render_summary(&report.warnings));
    }
    Ok(())
}
