//! Creates a small sample cruise tree for trying out WBTSdata.
//!
//! Two CTD casts and two LADCP velocity profiles are written the way the
//! processing software leaves them: source variable names, `cm/s` velocities,
//! `days since` time axes. The LADCP clock runs slightly ahead of the CTD's,
//! so the merge moves each CTD cast onto its LADCP time. A matching
//! `wbts.toml` is written next to them.

use ndarray::Array2;
use netcdf::create;
use std::fs;
use std::path::Path;

const CAST_TIMES: [f64; 2] = [0.25, 1.5];
/// LADCP clock offset from the CTD clock, in days
const LADCP_CLOCK_OFFSET: f64 = 0.01;
const TIME_UNITS: &str = "days since 2001-04-26 00:00:00";

fn write_ctd_cast(path: &Path, cast: usize) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        fs::remove_file(path)?
    }
    let mut file = create(path)?;

    file.add_attribute("instrument", "CTD")?;
    file.add_attribute("cast", cast as i32)?;

    let depths: Vec<f64> = (0..50).map(|i| i as f64 * 20.0).collect();
    file.add_dimension("time", 1)?;
    file.add_dimension("pr", depths.len())?;

    {
        let mut time_var = file.add_variable::<f64>("time", &["time"])?;
        time_var.put_attribute("units", TIME_UNITS)?;
        time_var.put_values(&[CAST_TIMES[cast - 1]], ..)?;
    }

    {
        let mut pr_var = file.add_variable::<f64>("pr", &["pr"])?;
        pr_var.put_attribute("units", "m")?;
        pr_var.put_attribute("positive", "down")?;
        pr_var.put_values(&depths, ..)?;
    }

    // Warm surface layer over a thermocline, fresher at depth
    let temperature: Vec<f64> = depths
        .iter()
        .map(|z| 4.5 + 21.0 * (-z / 300.0).exp() + 0.1 * cast as f64)
        .collect();
    let salinity: Vec<f64> = depths
        .iter()
        .map(|z| 34.9 + 1.3 * (-z / 400.0).exp())
        .collect();

    {
        let mut te_var = file.add_variable::<f64>("te", &["time", "pr"])?;
        te_var.put_attribute("units", "degree_C")?;
        te_var.put_attribute("long_name", "temperature")?;
        let te = Array2::from_shape_vec((1, depths.len()), temperature)?;
        te_var.put(te.view(), ..)?;
    }

    {
        let mut sa_var = file.add_variable::<f64>("sa", &["time", "pr"])?;
        sa_var.put_attribute("units", "PSU")?;
        sa_var.put_attribute("_FillValue", -999.0)?;
        let mut sa = Array2::from_shape_vec((1, depths.len()), salinity)?;
        // Bottle misfire
        sa[[0, 7]] = -999.0;
        sa_var.put(sa.view(), ..)?;
    }

    for (name, units, value) in [
        ("latitude", "degrees_north", 26.5),
        ("longitude", "degrees_east", -76.75 + 0.25 * cast as f64),
    ] {
        let mut var = file.add_variable::<f64>(name, &["time"])?;
        var.put_attribute("units", units)?;
        var.put_values(&[value], ..)?;
    }

    Ok(())
}

fn write_ladcp_cast(path: &Path, cast: usize) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        fs::remove_file(path)?
    }
    let mut file = create(path)?;

    file.add_attribute("instrument", "Lowered Acoustic Doppler Current Profilers")?;
    file.add_attribute("cast", cast as i32)?;

    let depths: Vec<f64> = (0..60).map(|i| i as f64 * 20.0).collect();
    file.add_dimension("time", 1)?;
    file.add_dimension("z", depths.len())?;

    {
        let mut time_var = file.add_variable::<f64>("time", &["time"])?;
        time_var.put_attribute("units", TIME_UNITS)?;
        time_var.put_values(&[CAST_TIMES[cast - 1] + LADCP_CLOCK_OFFSET], ..)?;
    }

    {
        let mut z_var = file.add_variable::<f64>("z", &["z"])?;
        z_var.put_attribute("units", "m")?;
        z_var.put_values(&depths, ..)?;
    }

    // Northward boundary current decaying with depth, in cm/s
    let v: Vec<f64> = depths.iter().map(|z| 80.0 * (-z / 250.0).exp()).collect();
    let u: Vec<f64> = depths.iter().map(|z| 5.0 * (z / 200.0).sin()).collect();
    let ev: Vec<f64> = depths.iter().map(|_| 2.0).collect();

    for (name, values) in [("u", u), ("v", v), ("ev", ev)] {
        let mut var = file.add_variable::<f64>(name, &["time", "z"])?;
        var.put_attribute("units", "cm/s")?;
        let data = Array2::from_shape_vec((1, depths.len()), values)?;
        var.put(data.view(), ..)?;
    }

    for (name, units, value) in [
        ("latitude", "degrees_north", 26.5),
        ("longitude", "degrees_east", -76.75 + 0.25 * cast as f64),
    ] {
        let mut var = file.add_variable::<f64>(name, &["time"])?;
        var.put_attribute("units", units)?;
        var.put_values(&[value], ..)?;
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = Path::new("sample_cruise");
    let cruise = root.join("GC_2001_04");
    let ctd_dir = cruise.join("CTD");
    let ladcp_dir = cruise.join("ladcp_velfiles");
    fs::create_dir_all(&ctd_dir)?;
    fs::create_dir_all(&ladcp_dir)?;

    println!("🔨 Creating sample cruise under: {}", root.display());

    for cast in 1..=CAST_TIMES.len() {
        write_ctd_cast(&ctd_dir.join(format!("ctd_{cast:03}.nc")), cast)?;
        write_ladcp_cast(&ladcp_dir.join(format!("ladcp_{cast:03}.nc")), cast)?;
    }

    fs::write(
        root.join("wbts.toml"),
        r#"threads = 2

[cruises.GC_2001_04]
cruise_id = "AB0104 / OC365-9"
start_date = "2001-04-26"
end_date = "2001-05-07"
ship = "R/V OCEANUS"
sections = "Abaco and Northwest Providence Channel Sections"
"#,
    )?;

    println!("✅ Successfully created:");
    println!("   📁 {}: ctd_001.nc, ctd_002.nc", ctd_dir.display());
    println!("   📁 {}: ladcp_001.nc, ladcp_002.nc", ladcp_dir.display());
    println!("   ⚙️  {}", root.join("wbts.toml").display());
    println!("\n🧪 Merge the cruise with:");
    println!("   cargo run --example merge_sample_cruise");
    println!(
        "   cargo run -- --config sample_cruise/wbts.toml merge {}/*.nc {}/*.nc -o merged.nc",
        ctd_dir.display(),
        ladcp_dir.display()
    );

    Ok(())
}
