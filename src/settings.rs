use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::drivers::AnalysisError;

pub const SETTINGS_FILE: &str = "settings.txt";

/// `key: value` entries of one discharge.
pub type Settings = BTreeMap<String, String>;

/// Entries of one settings file. Lines are split on their first colon; a
/// repeated key is stored as `key_1`, `key_2`, ... instead of overwriting.
pub fn parse_settings(text: &str) -> Settings {
    let mut settings = Settings::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            if !line.trim().is_empty() {
                debug!("ignoring settings line without a key: {line:?}");
            }
            continue;
        };
        let key = key.trim();
        let mut unique = key.to_string();
        let mut suffix = 0;
        while settings.contains_key(&unique) {
            suffix += 1;
            unique = format!("{key}_{suffix}");
        }
        settings.insert(unique, value.trim().to_string());
    }
    settings
}

/// Directories matching `<prefix>*` whose name ends in a digit, sorted.
/// A prefix ending in a separator (or empty) lists that whole directory.
pub fn discharge_dirs(prefix: &str) -> Result<Vec<PathBuf>, AnalysisError> {
    let path = Path::new(prefix);
    let (dir, stem) = if prefix.is_empty() || prefix.ends_with(std::path::is_separator) {
        (path, "")
    } else {
        (
            path.parent().unwrap_or(Path::new("")),
            path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
        )
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter(|e| {
            e.file_name().to_str().is_some_and(|name| {
                name.starts_with(stem) && name.ends_with(|c: char| c.is_ascii_digit())
            })
        })
        .map(|e| e.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Settings of many discharges, keyed by folder name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SettingsTable {
    pub discharges: BTreeMap<String, Settings>,
}

impl SettingsTable {
    /// Read every discharge under `prefix`. Folders without a settings file
    /// are skipped with a warning.
    pub fn collect(prefix: &str) -> Result<Self, AnalysisError> {
        let mut discharges = BTreeMap::new();
        for dir in discharge_dirs(prefix)? {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match fs::read_to_string(dir.join(SETTINGS_FILE)) {
                Ok(text) => {
                    discharges.insert(name, parse_settings(&text));
                }
                Err(e) => warn!("{}: no {SETTINGS_FILE}: {e}", dir.display()),
            }
        }
        info!("collected settings of {} discharges", discharges.len());
        Ok(Self { discharges })
    }

    /// Union of all keys, sorted.
    pub fn columns(&self) -> Vec<&str> {
        self.discharges
            .values()
            .flat_map(|s| s.keys().map(String::as_str))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn write_json(&self, path: &Path) -> Result<(), AnalysisError> {
        fs::write(path, serde_json::to_string_pretty(&self.discharges)?)?;
        Ok(())
    }

    /// Tab separated, one row per discharge; absent keys are left empty.
    pub fn write_csv(&self, path: &Path) -> Result<(), AnalysisError> {
        let columns = self.columns();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        writer.write_record(std::iter::once("shot").chain(columns.iter().copied()))?;
        for (shot, settings) in &self.discharges {
            let row = columns
                .iter()
                .map(|c| settings.get(*c).map_or("", String::as_str));
            writer.write_record(std::iter::once(shot.as_str()).chain(row))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes `<out>.json` and `<out>.csv`.
    pub fn write_all(&self, out: &str) -> Result<(PathBuf, PathBuf), AnalysisError> {
        let json = PathBuf::from(format!("{out}.json"));
        let csv = PathBuf::from(format!("{out}.csv"));
        self.write_json(&json)?;
        self.write_csv(&csv)?;
        Ok((json, csv))
    }
}
