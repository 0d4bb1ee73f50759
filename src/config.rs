use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::catalog::NormalizeConfig;
use crate::error::AppError;

fn default_port() -> u16 {
    11002
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Either the wildcard `"*"` or an explicit list of raw artist names whose
/// seed tracks force `match_all_genres` (§9 Open Question: the stable form).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IgnoreGenre {
    All(String),
    Artists(Vec<String>),
}

impl IgnoreGenre {
    pub fn matches(&self, raw_artist: &str) -> bool {
        match self {
            IgnoreGenre::All(s) => s == "*",
            IgnoreGenre::Artists(artists) => artists.iter().any(|a| a == raw_artist),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    lms: String,
    db: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default)]
    genres: Vec<Vec<String>>,
    #[serde(default)]
    ignoregenre: Option<IgnoreGenre>,
    #[serde(default)]
    album: Option<Vec<String>>,
    #[serde(default)]
    artist: Option<Vec<String>>,
    #[serde(default)]
    title: Option<Vec<String>>,
}

/// Validated, process-lifetime configuration (mirrors `original_source/lib/config.py`'s
/// `read_config`, ported from its `exit(-1)` fail-fast checks to `Result`).
#[derive(Debug, Clone)]
pub struct Config {
    pub lms_root: String,
    pub db_path: String,
    pub port: u16,
    pub host: String,
    pub genre_groups: Vec<Vec<String>>,
    pub ignoregenre: Option<IgnoreGenre>,
    pub normalize: NormalizeConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, AppError> {
        if !Path::new(path).exists() {
            return Err(AppError::ConfigInvalid(format!("{path} does not exist")));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::ConfigInvalid(format!("failed to read config file: {e}")))?;
        let raw: RawConfig = serde_json::from_str(&text)
            .map_err(|e| AppError::ConfigInvalid(format!("failed to parse config file: {e}")))?;

        if !Path::new(&raw.db).exists() {
            return Err(AppError::ConfigInvalid(format!("'{}' does not exist", raw.db)));
        }

        let mut normalize = NormalizeConfig::defaults();
        if let Some(tags) = raw.album {
            normalize.album_tags = tags;
        }
        if let Some(tags) = raw.artist {
            normalize.artist_tags = tags;
        }
        if let Some(tags) = raw.title {
            normalize.title_tags = tags;
        }

        Ok(Config {
            lms_root: raw.lms,
            db_path: raw.db,
            port: raw.port,
            host: raw.host,
            genre_groups: raw.genres,
            ignoregenre: raw.ignoregenre,
            normalize,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Union of every genre name configured across all groups, used only to
    /// decide whether `genres` was configured at all (mirrors `all_genres`
    /// in `config.py`, kept here for parity though the engine consults the
    /// Genre Model's own `all_genres` set directly).
    pub fn all_genre_names(&self) -> HashSet<String> {
        self.genre_groups.iter().flatten().cloned().collect()
    }
}
