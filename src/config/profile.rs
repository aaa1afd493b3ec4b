use clap::ValueEnum as _;
use compio::fs;
use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use crate::{application::data::LogLevel, ext::BestEffortPathExt};

const KNOWN_KEYS: &[&str] = &["source", "replica", "log", "repeat", "log_level"];

/// Settings read from a YAML profile. Every key is optional; the command line
/// fills or overrides whatever the profile leaves out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncProfile {
    pub source: Option<PathBuf>,
    pub replica: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub repeat: Option<String>,
    pub log_level: Option<LogLevel>,
    /// Keys this program does not understand. Profiles are read before
    /// logging starts, so these are reported later.
    pub unknown_keys: Vec<String>,
}

impl SyncProfile {
    /// Reads a profile. Relative paths inside it are taken relative to the
    /// directory holding the profile.
    pub async fn from_path(path: &Path) -> Result<Self, ProfileError> {
        let bytes = fs::read(path).await.context(ReadSnafu {
            file_path: path.best_effort_path_display(),
        })?;
        let contents = String::from_utf8(bytes).map_err(|_| ProfileError::NotUtf8Error {
            file_path: path.best_effort_path_display(),
        })?;

        let profile: SyncProfile = contents.as_str().try_into()?;
        let base = path
            .best_effort_absolute()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(profile.relative_to(&base))
    }

    fn relative_to(self, base: &Path) -> Self {
        let resolve = |path: Option<PathBuf>| {
            path.map(|p| if p.is_relative() { base.join(p) } else { p })
        };
        Self {
            source: resolve(self.source),
            replica: resolve(self.replica),
            log: resolve(self.log),
            ..self
        }
    }

    fn string_value<'a>(
        top_level: &'a LinkedHashMap<Yaml, Yaml>,
        key: &'static str,
    ) -> Result<Option<&'a str>, ProfileError> {
        match top_level.get(&Yaml::Value(Scalar::String(Cow::Borrowed(key)))) {
            None | Some(Yaml::Value(Scalar::Null)) => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .context(NotAStringSnafu { key }),
        }
    }
}

impl TryFrom<&str> for SyncProfile {
    type Error = ProfileError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let contents_vec =
            Yaml::load_from_str(contents).map_err(|e| ProfileError::ParseError { source: e })?;
        let contents = contents_vec.first().ok_or(ProfileError::MalformedProfile)?;

        let top_level = contents
            .as_mapping()
            .ok_or(ProfileError::TopLevelNotMap)?;

        let unknown_keys = top_level
            .keys()
            .filter_map(|key| match key.as_str() {
                Some(name) if KNOWN_KEYS.contains(&name) => None,
                Some(name) => Some(name.to_string()),
                None => Some(format!("{:?}", key)),
            })
            .collect();

        let log_level = Self::string_value(top_level, "log_level")?
            .map(|level| {
                LogLevel::from_str(level, true).map_err(|_| ProfileError::InvalidLogLevel {
                    level: level.to_string(),
                })
            })
            .transpose()?;

        Ok(SyncProfile {
            source: Self::string_value(top_level, "source")?.map(PathBuf::from),
            replica: Self::string_value(top_level, "replica")?.map(PathBuf::from),
            log: Self::string_value(top_level, "log")?.map(PathBuf::from),
            repeat: Self::string_value(top_level, "repeat")?.map(str::to_string),
            log_level,
            unknown_keys,
        })
    }
}

#[derive(Debug, Snafu)]
pub enum ProfileError {
    #[snafu(display("Failed to read the profile: {}", file_path))]
    ReadError {
        file_path: String,
        source: std::io::Error,
    },
    #[snafu(display("The profile {} is not valid UTF-8", file_path))]
    NotUtf8Error { file_path: String },
    #[snafu(display("Failed to parse the profile"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Improperly formatted profile"))]
    MalformedProfile,
    #[snafu(display("Top level of the profile should be a map"))]
    TopLevelNotMap,
    #[snafu(display("Profile key '{}' should be a string", key))]
    NotAStringError { key: &'static str },
    #[snafu(display("Unknown log level '{}'", level))]
    InvalidLogLevel { level: String },
}
