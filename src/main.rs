//! Entry point for the wbtsdata application.
//! Handles CLI parsing, logging setup, and dispatches the inspect, convert, merge and discover commands.

use clap::Parser;
use std::path::{Path, PathBuf};
use wbts_data::config::PipelineConfig;
use wbts_data::dataset::{Dataset, QcFlag};
use wbts_data::discover::{cruise_key, discover_instrument_dirs, list_data_files};
use wbts_data::loader::load_dataset;
use wbts_data::merge::{AxisPolicy, DimensionRule, MergeOptions, QcReport};
use wbts_data::metadata::{describe_variable, list_variables_and_dimensions, print_metadata};
use wbts_data::netcdf_io::NetCDFWriter;
use wbts_data::pipeline::{merge_years, Pipeline};
use wbts_data::Result;

mod cli;

use cli::{Args, Command};

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(args) {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = PipelineConfig::load_or_default(args.config.as_deref())?;
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    config.validate()?;

    match args.command {
        Command::Inspect { file, variable } => {
            let dataset = load_dataset(&file, &config.hint_for(None))?;
            println!("Successfully opened {}", file.display());
            match variable {
                Some(name) => describe_variable(&dataset, &name)?,
                None => {
                    print_metadata(&dataset);
                    list_variables_and_dimensions(&dataset);
                }
            }
        }

        Command::Convert {
            file,
            output,
            format,
            cruise,
        } => {
            let pipeline = Pipeline::new(&config).with_format(format).with_cruise(cruise);
            let loaded = load_dataset(&file, &pipeline.hint())?;
            let converted = pipeline.convert_one(&loaded, cruise_key(&file).as_deref())?;
            write_output(&config, &converted, &output)?;
            let non_canonical = converted
                .variables()
                .filter(|(_, v)| v.is_non_canonical())
                .count();
            println!(
                "✅ Converted {} variable(s) ({} non-canonical) to {}",
                converted.variable_names().len(),
                non_canonical,
                output.display()
            );
        }

        Command::Merge {
            files,
            output,
            format,
            policy,
            dimensions,
            tolerance,
            priorities,
            strict,
            remove_bad,
            report,
        } => {
            let mut options = config.merge.clone();
            apply_axis_overrides(&mut options, policy, &dimensions, tolerance);
            if !priorities.is_empty() {
                options.priorities = priorities;
            }
            options.strict |= strict;
            if remove_bad {
                options.remove_threshold = Some(QcFlag::Bad);
            }

            let run = Pipeline::new(&config)
                .with_format(format)
                .with_merge_options(options)
                .run(&files);
            println!(
                "Loaded {} file(s), converted {}",
                run.loaded.len(),
                run.converted.len()
            );
            let merged = run.into_result()?;
            write_output(&config, &merged.dataset, &output)?;
            print_report(&merged.report);
            if let Some(path) = report {
                merged.report.write_json(&path)?;
                println!("✅ Saved QC report to {}", path.display());
            }
            println!("✅ Saved merged dataset to {}", output.display());
        }

        Command::MergeYears {
            dir,
            output,
            max_files,
        } => {
            let merged = merge_years(&dir, &config, max_files)?;
            write_output(&config, &merged.dataset, &output)?;
            print_report(&merged.report);
            println!(
                "✅ Merged {} yearly file(s) into {}",
                merged.report.inputs,
                output.display()
            );
        }

        Command::Discover { dir } => {
            let found = discover_instrument_dirs(&dir, &config.discovery)?;
            print_dirs("CTD", &found.ctd)?;
            print_dirs("LADCP", &found.ladcp)?;
        }
    }

    Ok(())
}

fn apply_axis_overrides(
    options: &mut MergeOptions,
    policy: Option<AxisPolicy>,
    dimensions: &[String],
    tolerance: Option<f64>,
) {
    if policy.is_none() && tolerance.is_none() {
        return;
    }
    let update = |rule: DimensionRule| DimensionRule {
        policy: policy.unwrap_or(rule.policy),
        tolerance: tolerance.unwrap_or(rule.tolerance),
    };
    if dimensions.is_empty() {
        options.axis = update(options.axis);
        for rule in options.dimensions.values_mut() {
            *rule = update(*rule);
        }
    } else {
        for dim in dimensions {
            let current = options.dimensions.get(dim).copied().unwrap_or(options.axis);
            options.dimensions.insert(dim.clone(), update(current));
        }
    }
}

fn write_output(config: &PipelineConfig, dataset: &Dataset, output: &Path) -> Result<()> {
    NetCDFWriter::new(output)
        .with_attribute_order(&config.schema.attribute_order)
        .write(dataset)
}

fn print_report(report: &QcReport) {
    println!("\n QC Report");
    println!("=============");
    println!("    Inputs: {}", report.inputs);
    println!("    Conflicts resolved: {}", report.conflicts.len());
    println!(
        "    Flags: good {}, questionable {}, bad {}, missing {}",
        report.totals.good, report.totals.questionable, report.totals.bad, report.totals.missing
    );
    for hit in &report.rule_hits {
        println!("    └─ {} on {}: {} sample(s)", hit.rule, hit.variable, hit.samples);
    }
    if !report.attribute_disagreements.is_empty() {
        println!(
            "    Attribute disagreements: {}",
            report.attribute_disagreements.len()
        );
    }
    if report.removed_samples > 0 {
        println!("    Removed samples: {}", report.removed_samples);
    }
}

fn print_dirs(label: &str, dirs: &[PathBuf]) -> Result<()> {
    println!("\n {label} directories ({})", dirs.len());
    for dir in dirs {
        let files = list_data_files(dir)?;
        let key = cruise_key(dir).unwrap_or_else(|| "-".to_string());
        println!("    {} [{}] {} file(s)", dir.display(), key, files.len());
    }
    if dirs.is_empty() {
        println!("   (No directories found)");
    }
    Ok(())
}
