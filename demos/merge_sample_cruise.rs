//! Merges the cruise written by `create_sample_cruise`.
//!
//! Discovers the CTD and LADCP directories, runs the pipeline over every file
//! found and writes the merged dataset with its QC report.

use std::path::{Path, PathBuf};
use wbts_data::config::PipelineConfig;
use wbts_data::discover::{discover_instrument_dirs, list_data_files};
use wbts_data::merge::Resolution;
use wbts_data::netcdf_io::NetCDFWriter;
use wbts_data::pipeline::Pipeline;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let root = Path::new("sample_cruise");
    if !root.exists() {
        println!(
            "❌ {} not found, run `cargo run --example create_sample_cruise` first",
            root.display()
        );
        return Ok(());
    }

    let config = PipelineConfig::from_file(&root.join("wbts.toml"))?;
    let dirs = discover_instrument_dirs(root, &config.discovery)?;
    println!(
        "🔍 Found {} CTD and {} LADCP director(ies)",
        dirs.ctd.len(),
        dirs.ladcp.len()
    );

    let mut files: Vec<PathBuf> = Vec::new();
    for dir in dirs.ctd.iter().chain(dirs.ladcp.iter()) {
        files.extend(list_data_files(dir)?);
    }
    for file in &files {
        println!("   📄 {}", file.display());
    }

    let merged = Pipeline::new(&config).run(&files).into_result()?;

    let dataset = &merged.dataset;
    println!("\n🌊 Merged dataset");
    for coord in dataset.coordinates() {
        println!("   {} [{}]", coord.name(), coord.len());
    }
    for name in dataset.variable_names() {
        println!("   └─ {name}");
    }

    let report = &merged.report;
    println!("\n🧪 QC summary");
    println!("   Conflicts averaged: {}", report.conflicts_resolved_by(Resolution::Averaged));
    println!("   Conflicts settled by flag: {}", report.conflicts_resolved_by(Resolution::Flag));
    println!(
        "   Flags: good {}, questionable {}, bad {}, missing {}",
        report.totals.good, report.totals.questionable, report.totals.bad, report.totals.missing
    );
    for hit in &report.rule_hits {
        println!("   ⚠️  {} on {}: {} sample(s)", hit.rule, hit.variable, hit.samples);
    }

    let output = root.join("GC_2001_04_merged.nc");
    NetCDFWriter::new(&output)
        .with_attribute_order(&config.schema.attribute_order)
        .write(dataset)?;
    let report_path = root.join("GC_2001_04_qc.json");
    report.write_json(&report_path)?;

    println!("\n✅ Saved merged dataset to {}", output.display());
    println!("✅ Saved QC report to {}", report_path.display());

    Ok(())
}
