//! Unit tests for the WBTSdata building blocks
//!
//! Errors, flags, the dataset model, time units, schema tables, configuration
//! and discovery helpers.

use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};
use wbts_data::{
    config::PipelineConfig,
    convert::{CanonicalSchema, LinearConversion},
    dataset::{AttrValue, AttributeBag, Coordinate, Dataset, QcFlag, Variable},
    discover::{cruise_key, is_cruise_key},
    errors::WbtsError,
    merge::{AxisPolicy, QcCheck},
    parallel::ParallelConfig,
    table_io::split_header,
    time::{format_epoch_seconds, CfTimeUnits},
};

#[test]
fn test_error_types() {
    let not_found = WbtsError::FileNotFound {
        path: PathBuf::from("cast_001.nc"),
    };
    assert_eq!(format!("{}", not_found), "File not found: cast_001.nc");
    assert!(not_found.is_load_error());

    let schema_err = WbtsError::schema("LATITUDE", "required variable has no source");
    assert!(format!("{}", schema_err).contains("variable 'LATITUDE'"));
    assert!(!schema_err.is_load_error());

    let alignment_err = WbtsError::alignment("DEPTH", "intersection is empty");
    assert!(format!("{}", alignment_err).contains("dimension 'DEPTH'"));

    let qc_err = WbtsError::Qc {
        rule: "range".to_string(),
        variable: "TEMP".to_string(),
        index: vec![0, 3],
        coordinate: "DATETIME=988243200, DEPTH=30".to_string(),
    };
    assert_eq!(
        format!("{}", qc_err),
        "QC rule 'range' flagged variable 'TEMP' at DATETIME=988243200, DEPTH=30 (sample [0, 3])"
    );

    let var_err = WbtsError::VariableNotFound {
        var: "temp".to_string(),
    };
    assert!(format!("{}", var_err).contains("Variable 'temp' not found"));
}

#[test]
fn test_flag_ordering_and_codes() {
    assert!(QcFlag::Good < QcFlag::Questionable);
    assert!(QcFlag::Questionable < QcFlag::Bad);
    assert!(QcFlag::Bad < QcFlag::Missing);

    for flag in QcFlag::ALL {
        assert_eq!(QcFlag::from_code(flag.code()), flag);
        assert_eq!(flag.as_str().parse::<QcFlag>(), Ok(flag));
    }
    assert_eq!(QcFlag::from_code(2), QcFlag::Good);
    assert_eq!(QcFlag::from_code(8), QcFlag::Questionable);

    // Escalation never lowers a flag
    assert_eq!(QcFlag::Bad.escalate(QcFlag::Good), QcFlag::Bad);
    assert_eq!(QcFlag::Good.escalate(QcFlag::Questionable), QcFlag::Questionable);
    assert!("excellent".parse::<QcFlag>().is_err());
}

#[test]
fn test_coordinate_must_be_monotonic_and_finite() {
    assert!(Coordinate::new("DEPTH", vec![0.0, 10.0, 20.0], AttributeBag::new()).is_ok());
    assert!(Coordinate::new("DEPTH", vec![20.0, 10.0, 0.0], AttributeBag::new()).is_ok());

    let repeated = Coordinate::new("DEPTH", vec![0.0, 10.0, 10.0], AttributeBag::new());
    assert!(matches!(repeated, Err(WbtsError::InvalidStructure { .. })));

    let nan = Coordinate::new("DEPTH", vec![0.0, f64::NAN], AttributeBag::new());
    assert!(nan.is_err());
}

#[test]
fn test_variable_shape_must_match_dimensions() {
    let data = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 2.0, 3.0]).expect("shape");
    let var = Variable::numeric(vec!["DEPTH".to_string()], data).expect("variable");

    let short_axis = Coordinate::new("DEPTH", vec![0.0, 10.0], AttributeBag::new()).expect("axis");
    let result = Dataset::new()
        .with_coordinate(short_axis)
        .expect("coordinate")
        .with_variable("TEMP", var.clone());
    assert!(matches!(result, Err(WbtsError::InvalidStructure { .. })));

    // Undeclared dimension
    assert!(Dataset::new().with_variable("TEMP", var).is_err());

    // Rank mismatch between dims and data
    let flat = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![0.0; 4]).expect("shape");
    assert!(Variable::numeric(vec!["DEPTH".to_string()], flat).is_err());
}

#[test]
fn test_flags_track_missing_samples() {
    let data = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, f64::NAN, 3.0]).expect("shape");
    let mut var = Variable::numeric(vec!["DEPTH".to_string()], data).expect("variable");
    assert_eq!(
        var.flags().iter().copied().collect::<Vec<_>>(),
        vec![QcFlag::Good, QcFlag::Missing, QcFlag::Good]
    );

    assert!(var.escalate_flag(&[0], QcFlag::Bad));
    assert!(!var.escalate_flag(&[0], QcFlag::Questionable));
    assert_eq!(var.flags()[IxDyn(&[0])], QcFlag::Bad);

    // Only an override lowers a flag, and missing samples stay missing
    var.override_flag(&[0], QcFlag::Good).expect("in bounds");
    var.override_flag(&[1], QcFlag::Good).expect("in bounds");
    assert_eq!(var.flags()[IxDyn(&[0])], QcFlag::Good);
    assert_eq!(var.flags()[IxDyn(&[1])], QcFlag::Missing);
    assert!(var.override_flag(&[7], QcFlag::Good).is_err());
}

#[test]
fn test_rename_dimension_updates_variables() {
    let data = ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0, 2.0]).expect("shape");
    let ds = Dataset::new()
        .with_coordinate(Coordinate::new("z", vec![0.0, 8.0], AttributeBag::new()).expect("axis"))
        .expect("coordinate")
        .with_variable(
            "u",
            Variable::numeric(vec!["z".to_string()], data).expect("variable"),
        )
        .expect("variable");

    let renamed = ds.clone().rename_dimension("z", "DEPTH").expect("rename");
    assert_eq!(renamed.dimension_names(), vec!["DEPTH"]);
    assert_eq!(
        renamed.variable("u").expect("u").dims(),
        &["DEPTH".to_string()]
    );
    // The original is untouched
    assert_eq!(ds.dimension_names(), vec!["z"]);
    assert!(ds.rename_dimension("missing", "DEPTH").is_err());
}

#[test]
fn test_attribute_bag() {
    let mut attrs = AttributeBag::new();
    attrs.insert("project", "Western Boundary Time Series");
    attrs.insert("geospatial_lat_min", 26.5);
    attrs.insert("cast_count", 12_i64);

    assert_eq!(attrs.len(), 3);
    assert_eq!(attrs.get_str("project"), Some("Western Boundary Time Series"));
    assert_eq!(attrs.get("geospatial_lat_min").and_then(AttrValue::as_f64), Some(26.5));
    assert_eq!(attrs.get("cast_count").and_then(AttrValue::as_f64), Some(12.0));
    assert_eq!(attrs.get_str("cast_count"), None);

    let required = vec!["project".to_string(), "Conventions".to_string()];
    assert_eq!(attrs.missing_keys(&required), vec!["Conventions"]);

    let mut overrides = AttributeBag::new();
    overrides.insert("project", "WBTS");
    attrs.extend_from(&overrides);
    assert_eq!(attrs.get_str("project"), Some("WBTS"));
    assert_eq!(attrs.remove("cast_count"), Some(AttrValue::Integer(12)));
    assert!(!attrs.contains("cast_count"));

    let list = AttrValue::from(vec!["pg".to_string(), "w".to_string()]);
    assert_eq!(list.to_string(), "pg, w");
}

#[test]
fn test_cf_time_units() {
    let days = CfTimeUnits::parse("days since 2001-04-26 00:00:00").expect("parses");
    assert_eq!(days.to_epoch_linear(), (86_400.0, 988_243_200.0));
    assert!(!days.is_canonical());

    let hours = CfTimeUnits::parse("hours since 1970-01-01T00:00").expect("parses");
    assert_eq!(hours.seconds_per_unit, 3_600.0);
    assert_eq!(hours.epoch_offset, 0.0);

    let canonical = CfTimeUnits::parse("seconds since 1970-01-01 00:00:00").expect("parses");
    assert!(canonical.is_canonical());

    let date_only = CfTimeUnits::parse("days since 2001-04-26").expect("parses");
    assert_eq!(date_only.epoch_offset, 988_243_200.0);

    assert!(CfTimeUnits::parse("m/s").is_none());
    assert!(CfTimeUnits::parse("fortnights since 2001-04-26").is_none());
}

#[test]
fn test_format_epoch_seconds() {
    assert_eq!(
        format_epoch_seconds(988_243_200.0).as_deref(),
        Some("2001-04-26T00:00:00Z")
    );
    assert_eq!(
        format_epoch_seconds(988_243_200.0 + 3_661.0).as_deref(),
        Some("2001-04-26T01:01:01Z")
    );
    assert_eq!(format_epoch_seconds(f64::NAN), None);
}

#[test]
fn test_split_header() {
    assert_eq!(
        split_header("TEMP [degree_C]"),
        ("TEMP".to_string(), Some("degree_C".to_string()))
    );
    assert_eq!(split_header(" PRES "), ("PRES".to_string(), None));
    assert_eq!(split_header("flag []"), ("flag".to_string(), None));
    assert_eq!(split_header("[m]"), ("[m]".to_string(), None));
}

#[test]
fn test_linear_conversion() {
    let kelvin = LinearConversion::new(1.0, -273.15);
    assert!((kelvin.apply(283.15) - 10.0).abs() < 1e-9);

    let back = kelvin.inverse().expect("invertible");
    assert!((back.apply(10.0) - 283.15).abs() < 1e-9);

    assert!(LinearConversion::IDENTITY.is_identity());
    assert!(LinearConversion::new(0.0, 1.0).inverse().is_none());
}

#[test]
fn test_schema_conversion_lookup() {
    let schema = CanonicalSchema::wbts();

    assert_eq!(
        schema.conversion_between("m/s", "m/s"),
        Some(LinearConversion::IDENTITY)
    );
    assert_eq!(
        schema.conversion_between("cm/s", "m/s"),
        Some(LinearConversion::new(0.01, 0.0))
    );

    // Table entries also work backwards
    let to_cm = schema.conversion_between("m/s", "cm/s").expect("inverse entry");
    assert!((to_cm.apply(0.25) - 25.0).abs() < 1e-9);

    assert!(schema.conversion_between("knots", "m/s").is_none());

    let (target, conversion) = schema.preferred_target("mm/s").expect("preferred unit");
    assert_eq!(target, "m/s");
    assert!((conversion.apply(500.0) - 0.5).abs() < 1e-12);
    assert!(schema.preferred_target("m/s").is_none());
}

#[test]
fn test_wbts_schema_is_consistent() {
    let schema = CanonicalSchema::wbts();
    schema.validate().expect("built-in schema validates");

    assert!(schema.format("CTD").is_some());
    assert!(schema.format("LADCP").is_some());
    assert!(schema.canonical("TEMP").map_or(false, |v| v.required));
    assert!(schema.canonical("DOXY").map_or(false, |v| !v.required));

    let ladcp = schema.format("ladcp").expect("ladcp format");
    assert_eq!(ladcp.dimensions.get("z").map(String::as_str), Some("DEPTH"));
    assert_eq!(
        ladcp.mapping("u").map(|m| m.canonical.as_str()),
        Some("U_WATER_VELOCITY")
    );
    assert!(ladcp.hint().is_expected("ev"));
}

#[test]
fn test_config_from_toml() {
    let text = r#"
        input_dir = "data/input"
        threads = 2

        [merge]
        priorities = [1, 0]
        strict = true

        [merge.axis]
        policy = "nearest"
        tolerance = 0.5

        [merge.dimensions.DEPTH]
        policy = "union"
        tolerance = 1.0

        [[merge.qc_rules]]
        kind = "range"
        variables = ["TEMP"]
        min = -2.5
        max = 40.0

        [[merge.qc_rules]]
        kind = "non_finite"

        [cruises.GC_2001_04]
        cruise_id = "AB0104 / OC365-9"
        start_date = "2001-04-26"
        end_date = "2001-05-07"
        ship = "R/V OCEANUS"
    "#;

    let config = PipelineConfig::from_toml_str(text).expect("valid configuration");
    assert_eq!(config.input_dir.as_deref(), Some(Path::new("data/input")));
    assert_eq!(config.parallel().effective_threads(), 2);

    let merge = &config.merge;
    assert_eq!(merge.axis.policy, AxisPolicy::Nearest);
    assert_eq!(merge.axis.tolerance, 0.5);
    assert_eq!(merge.dimensions["DEPTH"].policy, AxisPolicy::Union);
    assert_eq!(merge.priority(0), 1);
    assert_eq!(merge.priority(5), 0);
    assert!(merge.strict);
    assert_eq!(merge.qc_rules.len(), 2);
    assert_eq!(merge.qc_rules[0].variables, vec!["TEMP".to_string()]);
    assert_eq!(
        merge.qc_rules[0].check,
        QcCheck::Range {
            min: -2.5,
            max: 40.0
        }
    );
    assert_eq!(merge.qc_rules[1].check, QcCheck::NonFinite);

    // Sections left out fall back to the defaults
    assert!(config.schema.format("ladcp").is_some());
    assert_eq!(
        config.discovery.all_years_file,
        "WBTS_all_years_CTD_LADCP.nc"
    );

    let attrs = config.cruise_attributes("GC_2001_04");
    assert_eq!(attrs.get_str("cruise_key"), Some("GC_2001_04"));
    assert_eq!(attrs.get_str("time_cruise_start"), Some("2001-04-26"));
    assert_eq!(attrs.get_str("ship"), Some("R/V OCEANUS"));
    assert!(config.cruise_attributes("GC_1999_01").is_empty());
}

#[test]
fn test_config_validation() {
    let bad_key = PipelineConfig::from_toml_str("[cruises.cruise_one]\nship = \"X\"\n");
    assert!(matches!(bad_key, Err(WbtsError::Config { .. })));

    let zero_threads = PipelineConfig::from_toml_str("threads = 0\n");
    assert!(matches!(zero_threads, Err(WbtsError::Config { .. })));

    let negative = PipelineConfig::from_toml_str("[merge.dimensions.DEPTH]\ntolerance = -1.0\n");
    assert!(matches!(negative, Err(WbtsError::Config { .. })));

    let unknown_rule = PipelineConfig::from_toml_str("[[merge.qc_rules]]\nkind = \"median\"\n");
    assert!(matches!(unknown_rule, Err(WbtsError::Toml(_))));

    let missing = PipelineConfig::from_file(Path::new("/nonexistent/wbts.toml"));
    assert!(matches!(missing, Err(WbtsError::FileNotFound { .. })));

    let defaults = PipelineConfig::load_or_default(None).expect("defaults");
    defaults.validate().expect("defaults validate");
    assert!(!defaults.merge.qc_rules.is_empty());
}

#[test]
fn test_axis_policy_parsing() {
    assert_eq!("union".parse::<AxisPolicy>().ok(), Some(AxisPolicy::Union));
    assert_eq!("Nearest".parse::<AxisPolicy>().ok(), Some(AxisPolicy::Nearest));
    assert!(matches!(
        "closest".parse::<AxisPolicy>(),
        Err(WbtsError::Config { .. })
    ));
    assert_eq!(AxisPolicy::Intersection.to_string(), "intersection");
}

#[test]
fn test_cruise_keys() {
    assert!(is_cruise_key("GC_2001_04"));
    assert!(!is_cruise_key("GC_2001_4"));
    assert!(!is_cruise_key("GC-2001-04"));

    assert_eq!(
        cruise_key(Path::new("/data/GC_2001_04_Oceanus/CTD/cast_001.nc")).as_deref(),
        Some("GC_2001_04")
    );
    assert_eq!(cruise_key(Path::new("/data/GC_notes/CTD/cast.nc")), None);
    assert_eq!(cruise_key(Path::new("/data/CTD/cast.nc")), None);
}

#[test]
fn test_parallel_config() {
    let default_config = ParallelConfig::default();
    assert!(default_config.num_threads.is_none());
    assert!(default_config.effective_threads() >= 1);

    let config_4 = ParallelConfig::with_threads(4);
    assert_eq!(config_4.num_threads, Some(4));
    assert_eq!(config_4.effective_threads(), 4);

    let all_cores = ParallelConfig::all_cores();
    assert_eq!(all_cores.num_threads, Some(num_cpus::get()));

    let threads = ParallelConfig::with_threads(2)
        .install(rayon::current_num_threads)
        .expect("pool builds");
    assert_eq!(threads, 2);
}
