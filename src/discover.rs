//! Locating cruise data on disk
//!
//! WBTS cruises are stored one directory per cruise, with CTD files under a
//! `CTD` directory and LADCP velocity files under `ladcp_velfiles` (or
//! `LADCP_velfiles`). Yearly merged products live in a `Merged` directory.

use crate::errors::{Result, WbtsError};
use crate::loader::FileKind;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directory names and exclusions used when searching a data tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    pub ctd_dir_names: Vec<String>,
    pub ladcp_dir_names: Vec<String>,
    /// Paths containing any of these are skipped when collecting CTD directories
    pub ctd_exclude: Vec<String>,
    /// Paths containing any of these are skipped when collecting LADCP directories
    pub ladcp_exclude: Vec<String>,
    /// File name of the all-years product, never an input to `merge-years`
    pub all_years_file: String,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            ctd_dir_names: vec!["CTD".to_string()],
            ladcp_dir_names: vec!["ladcp_velfiles".to_string(), "LADCP_velfiles".to_string()],
            ctd_exclude: vec!["Created_files".to_string()],
            ladcp_exclude: vec!["2019_12".to_string()],
            all_years_file: "WBTS_all_years_CTD_LADCP.nc".to_string(),
        }
    }
}

/// Instrument directories found under a root, each list sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentDirs {
    pub ctd: Vec<PathBuf>,
    pub ladcp: Vec<PathBuf>,
}

fn check_dir(root: &Path) -> Result<()> {
    if !root.exists() {
        return Err(WbtsError::FileNotFound {
            path: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(WbtsError::load(root, "not a directory"));
    }
    Ok(())
}

fn excluded(path: &Path, exclude: &[String]) -> bool {
    let path = path.to_string_lossy();
    exclude.iter().any(|e| path.contains(e.as_str()))
}

fn is_named(entry: &DirEntry, names: &[String]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map_or(false, |n| names.iter().any(|name| name == n))
}

/// Find CTD and LADCP directories anywhere below `root`
pub fn discover_instrument_dirs(root: &Path, options: &DiscoveryOptions) -> Result<InstrumentDirs> {
    check_dir(root)?;

    let mut dirs = InstrumentDirs::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing entry: {e}");
                continue;
            }
        };
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if is_named(&entry, &options.ctd_dir_names) && !excluded(relative, &options.ctd_exclude) {
            dirs.ctd.push(path.to_path_buf());
        } else if is_named(&entry, &options.ladcp_dir_names)
            && !excluded(relative, &options.ladcp_exclude)
        {
            dirs.ladcp.push(path.to_path_buf());
        }
    }
    dirs.ctd.sort();
    dirs.ladcp.sort();

    debug!(
        "Found {} CTD and {} LADCP director(ies) under {}",
        dirs.ctd.len(),
        dirs.ladcp.len(),
        root.display()
    );
    Ok(dirs)
}

/// Readable data files directly inside `dir`, sorted by name
pub fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    check_dir(dir)?;
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && FileKind::from_path(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

/// NetCDF files of a merged-products directory, without the all-years product
///
/// Sorted by name and cut to `max_files` when given.
pub fn merged_files(dir: &Path, options: &DiscoveryOptions, max_files: Option<usize>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = list_data_files(dir)?
        .into_iter()
        .filter(|p| FileKind::from_path(p) == Some(FileKind::NetCDF))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n != options.all_years_file)
        })
        .collect();
    if let Some(max) = max_files {
        files.truncate(max);
    }
    Ok(files)
}

/// Cruise key (`GC_YYYY_MM`) of the first path component that starts with one
pub fn cruise_key(path: &Path) -> Option<String> {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .find(|c| c.starts_with("GC"))
        .and_then(|c| c.get(..10))
        .filter(|key| is_cruise_key(key))
        .map(str::to_string)
}

/// Whether `key` has the `GC_YYYY_MM` form
pub fn is_cruise_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    bytes.len() == 10
        && key.starts_with("GC_")
        && bytes[3..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'_'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}
