//! Converter behaviour against the WBTS schema

use ndarray::{ArrayD, IxDyn};
use wbts_data::{
    convert::{CanonicalSchema, CanonicalVariable, Converter, VariableMapping, SOURCE_FORMAT_ATTR},
    dataset::{AttributeBag, Coordinate, Dataset, Variable},
    errors::WbtsError,
    merge::{merge_datasets, MergeOptions},
    time::CANONICAL_TIME_UNITS,
};

const EPOCH_2001_04_26: f64 = 988_243_200.0;

fn axis(name: &str, values: &[f64], units: &str) -> Coordinate {
    let mut attrs = AttributeBag::new();
    attrs.insert("units", units);
    Coordinate::new(name, values.to_vec(), attrs).expect("valid axis")
}

fn field(dims: &[&str], shape: &[usize], values: Vec<f64>, units: &str) -> Variable {
    let data = ArrayD::from_shape_vec(IxDyn(shape), values).expect("shape matches");
    Variable::numeric(dims.iter().map(|d| d.to_string()).collect(), data)
        .expect("valid variable")
        .with_attribute("units", units)
}

/// Raw LADCP cast: two profiles over three depth bins, velocities in cm/s
fn ladcp_cast(with_position: bool) -> Dataset {
    let mut ds = Dataset::new()
        .with_coordinate(axis("time", &[0.0, 0.5], "days since 2001-04-26 00:00:00"))
        .expect("time axis")
        .with_coordinate(axis("z", &[10.0, 20.0, 30.0], "m"))
        .expect("depth axis")
        .with_variable(
            "u",
            field(&["time", "z"], &[2, 3], vec![10.0, 20.0, -5.0, 0.0, 15.0, f64::NAN], "cm/s"),
        )
        .expect("u")
        .with_variable(
            "v",
            field(&["time", "z"], &[2, 3], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], "m/s"),
        )
        .expect("v")
        .with_variable("pg", field(&["time", "z"], &[2, 3], vec![90.0; 6], "%"))
        .expect("pg")
        .with_attribute("instrument", "LADCP");
    if with_position {
        ds = ds
            .with_variable("latitude", field(&["time"], &[2], vec![26.5, 26.5], "degrees_north"))
            .expect("latitude")
            .with_variable("longitude", field(&["time"], &[2], vec![-76.7, -76.5], "degrees_east"))
            .expect("longitude");
    }
    ds
}

fn numbers(ds: &Dataset, name: &str) -> Vec<f64> {
    ds.variable(name)
        .and_then(Variable::values)
        .expect("numeric variable")
        .iter()
        .copied()
        .collect()
}

fn same_dataset(a: &Dataset, b: &Dataset) -> bool {
    let same_numbers = |x: &Variable, y: &Variable| match (x.values(), y.values()) {
        (Some(p), Some(q)) => p
            .iter()
            .zip(q.iter())
            .all(|(u, v)| (u.is_nan() && v.is_nan()) || u == v),
        (None, None) => x.data() == y.data(),
        _ => false,
    };
    a.coordinates() == b.coordinates()
        && a.attrs() == b.attrs()
        && a.variable_names() == b.variable_names()
        && a.variables().all(|(name, x)| {
            b.variable(name).map_or(false, |y| {
                x.shape() == y.shape()
                    && x.dims() == y.dims()
                    && x.attrs() == y.attrs()
                    && x.flags() == y.flags()
                    && same_numbers(x, y)
            })
        })
}

#[test]
fn test_convert_ladcp_cast() {
    let schema = CanonicalSchema::wbts();
    let converted = Converter::new(&schema)
        .convert(&ladcp_cast(true), None)
        .expect("conversion succeeds");

    // Dimensions renamed and the time axis moved onto epoch seconds
    assert_eq!(converted.dimension_names(), vec!["DATETIME", "DEPTH"]);
    let time = converted.coordinate("DATETIME").expect("DATETIME axis");
    assert_eq!(time.values(), &[EPOCH_2001_04_26, EPOCH_2001_04_26 + 43_200.0]);
    assert_eq!(time.units(), Some(CANONICAL_TIME_UNITS));

    // cm/s -> m/s
    let u = converted.variable("U_WATER_VELOCITY").expect("U");
    assert_eq!(u.units(), Some("m/s"));
    assert_eq!(u.dims(), &["DATETIME".to_string(), "DEPTH".to_string()]);
    let expected = [0.1, 0.2, -0.05, 0.0, 0.15];
    for (got, want) in numbers(&converted, "U_WATER_VELOCITY").iter().zip(expected) {
        assert!((got - want).abs() < 1e-12, "expected {want}, got {got}");
    }
    assert!(numbers(&converted, "U_WATER_VELOCITY")[5].is_nan());
    assert_eq!(
        u.attrs().get_str("standard_name"),
        Some("eastward_sea_water_velocity")
    );

    // Already in canonical units
    assert_eq!(
        numbers(&converted, "V_WATER_VELOCITY"),
        vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]
    );

    // Required variables without a source are filled with the default
    let temp = converted.variable("TEMP").expect("defaulted TEMP");
    assert_eq!(temp.shape(), &[2, 3]);
    assert!(numbers(&converted, "TEMP").iter().all(|v| v.is_nan()));
    assert!(!converted.contains_variable("DOXY"));

    // Unknown variables pass through tagged
    let pg = converted.variable("pg").expect("passthrough variable");
    assert!(pg.is_non_canonical());
    assert!(!u.is_non_canonical());

    let attrs = converted.attrs();
    assert_eq!(attrs.get_str(SOURCE_FORMAT_ATTR), Some("ladcp"));
    assert_eq!(attrs.get_str("Conventions"), Some("CF-1.11"));
    assert_eq!(attrs.get_str("title"), Some("LADCP data of the Abaco Cruise"));
}

#[test]
fn test_convert_is_idempotent() {
    let schema = CanonicalSchema::wbts();
    let converter = Converter::new(&schema);

    let once = converter.convert(&ladcp_cast(true), None).expect("first pass");
    let twice = converter.convert(&once, None).expect("second pass");

    assert!(same_dataset(&once, &twice));
}

#[test]
fn test_convert_does_not_modify_input() {
    let schema = CanonicalSchema::wbts();
    let input = ladcp_cast(true);
    let before = input.clone();

    Converter::new(&schema)
        .convert(&input, Some("ladcp"))
        .expect("conversion succeeds");
    assert!(same_dataset(&input, &before));
}

#[test]
fn test_missing_required_variable_is_a_schema_error() {
    let schema = CanonicalSchema::wbts();
    let err = Converter::new(&schema)
        .convert(&ladcp_cast(false), None)
        .unwrap_err();

    match err {
        WbtsError::Schema { variable, .. } => assert_eq!(variable, "LATITUDE"),
        other => panic!("expected a schema error, got {other:?}"),
    }
}

#[test]
fn test_unknown_format_is_a_schema_error() {
    let schema = CanonicalSchema::wbts();
    let err = Converter::new(&schema)
        .convert(&ladcp_cast(true), Some("glider"))
        .unwrap_err();
    assert!(matches!(err, WbtsError::Schema { ref variable, .. } if variable == "glider"));
}

#[test]
fn test_unit_without_conversion_is_a_schema_error() {
    let schema = CanonicalSchema::wbts();
    let input = ladcp_cast(true)
        .with_variable("u", field(&["time", "z"], &[2, 3], vec![1.0; 6], "knots"))
        .expect("replace u");

    let err = Converter::new(&schema).convert(&input, None).unwrap_err();
    match err {
        WbtsError::Schema { variable, message } => {
            assert_eq!(variable, "U_WATER_VELOCITY");
            assert!(message.contains("knots"));
        }
        other => panic!("expected a schema error, got {other:?}"),
    }
}

#[test]
fn test_detect_format() {
    let schema = CanonicalSchema::wbts();
    let converter = Converter::new(&schema);

    let by_instrument = converter.detect_format(&ladcp_cast(true)).expect("detected");
    assert_eq!(by_instrument.name, "ladcp");

    let ctd = Dataset::new()
        .with_coordinate(axis("pr", &[0.0, 2.0], "dbar"))
        .expect("pressure axis")
        .with_variable("te", field(&["pr"], &[2], vec![25.0, 24.9], "degree_C"))
        .expect("te")
        .with_variable("sa", field(&["pr"], &[2], vec![36.1, 36.2], "PSU"))
        .expect("sa");
    let by_variables = converter.detect_format(&ctd).expect("detected");
    assert_eq!(by_variables.name, "ctd");

    assert!(converter.detect_format(&Dataset::new()).is_none());
}

#[test]
fn test_custom_schema_with_explicit_conversion() {
    let mut schema = CanonicalSchema::empty();
    schema.variables.push(CanonicalVariable::new(
        "TEMP",
        Some("degree_C"),
        "Sea water temperature",
        None,
    ));
    let mut format = CanonicalSchema::wbts()
        .format("ctd")
        .cloned()
        .expect("ctd format");
    let mut fahrenheit = VariableMapping::new("t_f", "TEMP", Some("degF"));
    fahrenheit.conversion = Some(wbts_data::convert::LinearConversion::new(
        5.0 / 9.0,
        -160.0 / 9.0,
    ));
    format.variables = vec![fahrenheit];
    format.attributes = AttributeBag::new();
    schema.formats.push(format);

    let input = Dataset::new()
        .with_coordinate(axis("pr", &[0.0], "dbar"))
        .expect("axis")
        .with_variable(
            "t_f",
            Variable::numeric(
                vec!["pr".to_string()],
                ArrayD::from_shape_vec(IxDyn(&[1]), vec![50.0]).expect("shape"),
            )
            .expect("variable"),
        )
        .expect("t_f");

    let converted = Converter::new(&schema)
        .convert(&input, Some("CTD"))
        .expect("conversion succeeds");
    assert_eq!(converted.dimension_names(), vec!["DEPTH"]);
    let temp = numbers(&converted, "TEMP");
    assert!((temp[0] - 10.0).abs() < 1e-9);
    assert_eq!(
        converted.variable("TEMP").and_then(Variable::units),
        Some("degree_C")
    );
}

/// Single CTD profile whose time axis is already in epoch-based units
fn ctd_profile(time_units: &str, time: f64) -> Dataset {
    Dataset::new()
        .with_coordinate(axis("time", &[time], time_units))
        .expect("time axis")
        .with_coordinate(axis("pr", &[0.0, 10.0], "m"))
        .expect("depth axis")
        .with_variable("te", field(&["time", "pr"], &[1, 2], vec![25.0, 20.0], "degree_C"))
        .expect("te")
        .with_variable("latitude", field(&["time"], &[1], vec![26.5], "degrees_north"))
        .expect("latitude")
        .with_variable("longitude", field(&["time"], &[1], vec![-76.7], "degrees_east"))
        .expect("longitude")
        .with_attribute("instrument", "CTD")
}

#[test]
fn test_epoch_time_spellings_convert_to_one_unit() {
    let schema = CanonicalSchema::wbts();
    let converter = Converter::new(&schema);

    let seconds = converter
        .convert(&ctd_profile("seconds since 1970-01-01", EPOCH_2001_04_26), None)
        .expect("seconds since the epoch");
    let days = converter
        .convert(&ctd_profile("days since 1970-01-01 00:00:00", 11_439.0), None)
        .expect("days since the epoch");

    for converted in [&seconds, &days] {
        let time = converted.coordinate("DATETIME").expect("DATETIME axis");
        assert_eq!(time.units(), Some(CANONICAL_TIME_UNITS));
    }
    assert_eq!(
        seconds.coordinate("DATETIME").expect("DATETIME").values(),
        &[EPOCH_2001_04_26]
    );

    let merged = merge_datasets(&[seconds, days], &MergeOptions::default())
        .expect("inputs share the canonical time units");
    assert_eq!(
        merged.dataset.coordinate("DATETIME").expect("DATETIME").values(),
        &[EPOCH_2001_04_26, EPOCH_2001_04_26 + 86_400.0]
    );
}
