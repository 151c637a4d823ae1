//! Format detection, scenario discovery, and (de)serialization of net
//! records and settings.
//!
//! The loader is a thin layer over serde: it picks RON, TOML or JSON from
//! the file extension, deserializes into the core record types, and hands
//! the result to [`Simulation::from_record`].

use std::path::{Path, PathBuf};

use petrisim_core::engine::Simulation;
use petrisim_core::record::{NetRecord, RecordError};
use petrisim_core::settings::{Settings, SettingsValidationError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Base name of the net file in a scenario directory.
pub const NET_FILE: &str = "net";
/// Base name of the optional settings file in a scenario directory.
pub const SETTINGS_FILE: &str = "settings";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading or saving data files.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A value could not be written in the requested format.
    #[error("cannot write {file}: {source}")]
    Serialize {
        file: PathBuf,
        #[source]
        source: EncodeError,
    },

    /// The record parsed but does not describe a valid net.
    #[error("invalid net in {file}: {source}")]
    Record {
        file: PathBuf,
        #[source]
        source: RecordError,
    },

    /// The settings parsed but failed validation.
    #[error("invalid settings in {file}: {source}")]
    Settings {
        file: PathBuf,
        #[source]
        source: SettingsValidationError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from rendering a value in one of the supported formats.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("ron: {0}")]
    Ron(#[from] ron::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::ser::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for format in Format::ALL {
        let candidate = dir.join(format!("{base_name}.{}", format.extension()));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Serialization
// ===========================================================================

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let parse_err = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_err(e.to_string())),
    }
}

/// Render `value` in the given format.
pub fn to_string<T: Serialize>(value: &T, format: Format) -> Result<String, EncodeError> {
    let text = match format {
        Format::Ron => {
            let mut pretty = ron::ser::PrettyConfig::default();
            pretty.new_line = "\n".into();
            ron::ser::to_string_pretty(value, pretty)?
        }
        Format::Json => serde_json::to_string_pretty(value)?,
        Format::Toml => toml::to_string_pretty(value)?,
    };
    Ok(text)
}

/// Serialize `value` into `path`, choosing the format from the extension.
pub fn serialize_file<T: Serialize>(path: &Path, value: &T) -> Result<(), DataLoadError> {
    let format = detect_format(path)?;
    let content = to_string(value, format).map_err(|source| DataLoadError::Serialize {
        file: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, content)?;
    Ok(())
}

// ===========================================================================
// Nets and settings
// ===========================================================================

/// Load a net record. The record is parsed but not yet built.
pub fn load_net(path: &Path) -> Result<NetRecord, DataLoadError> {
    let record: NetRecord = deserialize_file(path)?;
    debug!(
        file = %path.display(),
        places = record.places.len(),
        transitions = record.transitions.len(),
        arcs = record.arcs.len(),
        "loaded net record"
    );
    Ok(record)
}

/// Load and validate settings. Missing fields take their defaults.
pub fn load_settings(path: &Path) -> Result<Settings, DataLoadError> {
    let settings: Settings = deserialize_file(path)?;
    settings
        .validate()
        .map_err(|source| DataLoadError::Settings {
            file: path.to_path_buf(),
            source,
        })?;
    debug!(file = %path.display(), "loaded settings");
    Ok(settings)
}

pub fn save_net(path: &Path, record: &NetRecord) -> Result<(), DataLoadError> {
    serialize_file(path, record)?;
    debug!(file = %path.display(), "saved net record");
    Ok(())
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), DataLoadError> {
    serialize_file(path, settings)
}

// ===========================================================================
// Scenarios
// ===========================================================================

/// A net record and the settings to run it with, as found in one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub net: NetRecord,
    pub settings: Settings,
    pub net_file: PathBuf,
    /// `None` when the directory had no settings file.
    pub settings_file: Option<PathBuf>,
}

impl Scenario {
    /// Build a fresh simulation from the scenario.
    pub fn build(&self) -> Result<Simulation, DataLoadError> {
        Simulation::from_record(&self.net, self.settings.clone()).map_err(|source| {
            DataLoadError::Record {
                file: self.net_file.clone(),
                source,
            }
        })
    }
}

/// Load `net.{ron,toml,json}` and, if present, `settings.{ron,toml,json}`
/// from `dir`.
pub fn load_scenario(dir: &Path) -> Result<Scenario, DataLoadError> {
    let net_file = require_data_file(dir, NET_FILE)?;
    let settings_file = find_data_file(dir, SETTINGS_FILE)?;

    let net = load_net(&net_file)?;
    let settings = match &settings_file {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };

    Ok(Scenario {
        net,
        settings,
        net_file,
        settings_file,
    })
}

/// Load a scenario directory and build its simulation.
pub fn load_simulation(dir: &Path) -> Result<Simulation, DataLoadError> {
    load_scenario(dir)?.build()
}

// ===========================================================================
// Tests
// ===========================================================================
