use std::collections::HashMap;

use log::{debug, warn};
use ndarray::Array2;
use rusqlite::Connection;

use crate::error::AppError;
use crate::genre::GenreModel;

/// Twelve acoustic attributes in catalog-column order, BPM last; the 13th
/// feature-vector slot (the genre-distance column) is appended separately.
pub const ATTRIB_NAMES: [&str; 12] = [
    "danceable",
    "aggressive",
    "electronic",
    "acoustic",
    "happy",
    "party",
    "relaxed",
    "sad",
    "dark",
    "tonal",
    "voice",
    "bpm",
];
pub const ATTRIB_COUNT: usize = ATTRIB_NAMES.len();
pub const VECTOR_DIM: usize = ATTRIB_COUNT + 1;
/// Placeholder written into the genre-distance column at load time. Never
/// read directly; the Similarity Engine recomputes it per query (I5, P1).
pub const GENRE_SLOT_SENTINEL: f64 = 5.0;

const GENRE_SEPARATOR: char = ';';

#[derive(Debug, Default, Clone)]
pub struct NormalizeConfig {
    pub album_tags: Vec<String>,
    pub artist_tags: Vec<String>,
    pub title_tags: Vec<String>,
}

impl NormalizeConfig {
    pub fn defaults() -> Self {
        NormalizeConfig {
            album_tags: [
                "anniversary edition",
                "deluxe edition",
                "expanded edition",
                "extended edition",
                "special edition",
                "deluxe",
                "deluxe version",
                "extended deluxe",
                "super deluxe",
                "re-issue",
                "remastered",
                "mixed",
                "remixed and remastered",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            artist_tags: ["feat", "ft", "featuring"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            title_tags: [
                "demo",
                "demo version",
                "radio edit",
                "remastered",
                "session version",
                "live",
                "live acoustic",
                "acoustic",
                "industrial remix",
                "alternative version",
                "alternate version",
                "original mix",
                "bonus track",
                "re-recording",
                "alternate",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Strips `. ( ) [ ]`, folds ` & ` to ` and `, and collapses repeated spaces.
/// Shared tail of album/artist/title normalization (applied last, after any
/// tag stripping, so the tags can still match their bracketed form).
fn normalize_str(s: &str) -> String {
    let mut out = s
        .replace('.', "")
        .replace('(', "")
        .replace(')', "")
        .replace('[', "")
        .replace(']', "")
        .replace(" & ", " and ");
    while out.contains("  ") {
        out = out.replace("  ", " ");
    }
    out
}

fn strip_tags(lowered: &str, tags: &[String]) -> String {
    let mut s = lowered.to_string();
    for tag in tags {
        s = s.replace(&format!(" ({})", tag), "");
        s = s.replace(&format!(" [{}]", tag), "");
    }
    s
}

pub fn normalize_album(album: &str, cfg: &NormalizeConfig) -> String {
    if album.is_empty() {
        return String::new();
    }
    let lowered = album.to_lowercase();
    normalize_str(&strip_tags(&lowered, &cfg.album_tags))
}

pub fn normalize_title(title: &str, cfg: &NormalizeConfig) -> String {
    if title.is_empty() {
        return String::new();
    }
    let lowered = title.to_lowercase();
    normalize_str(&strip_tags(&lowered, &cfg.title_tags))
}

pub fn normalize_artist(artist: &str, cfg: &NormalizeConfig) -> String {
    if artist.is_empty() {
        return String::new();
    }
    let normalized = normalize_str(&artist.to_lowercase());
    for tag in &cfg.artist_tags {
        let needle = format!(" {} ", tag);
        if let Some(pos) = normalized.find(&needle) {
            if pos > 2 {
                return normalized[..pos].to_string();
            }
        }
    }
    normalized
}

/// An immutable catalog entry (C2's `Track`).
#[derive(Debug, Clone)]
pub struct Track {
    pub file: String,
    pub title: String,
    pub title_norm: String,
    pub artist: String,
    pub artist_norm: String,
    pub album: String,
    pub album_norm: String,
    pub albumartist: String,
    pub albumartist_norm: String,
    pub duration: u32,
    /// Stable identity; also this track's index into the feature array (I1).
    pub rowid: usize,
    pub genres: Vec<String>,
    pub igenres: Vec<u32>,
}

impl Track {
    pub fn primary_genre(&self) -> u32 {
        self.igenres.first().copied().unwrap_or(crate::genre::NO_GENRE_ID)
    }
}

/// Read-only, rowid-indexable feature store (C2). Owns both the track
/// metadata and the contiguous `N x 13` feature matrix.
pub struct FeatureIndex {
    tracks: Vec<Track>,
    features: Array2<f64>,
    by_file: HashMap<String, usize>,
}

impl FeatureIndex {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, rowid: usize) -> Option<&Track> {
        self.tracks.get(rowid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn lookup_by_file(&self, file: &str) -> Option<&Track> {
        self.by_file.get(file).and_then(|&row| self.tracks.get(row))
    }

    /// The 12 stored acoustic attributes for `rowid` (BPM already normalized).
    /// Never includes the genre-distance slot, which the Similarity Engine
    /// computes independently per query.
    pub fn base_attribs(&self, rowid: usize) -> [f64; ATTRIB_COUNT] {
        let row = self.features.row(rowid);
        let mut out = [0.0; ATTRIB_COUNT];
        out.copy_from_slice(&row.as_slice().expect("contiguous row")[..ATTRIB_COUNT]);
        out
    }
}

fn genre_separated(raw: &str) -> Vec<String> {
    raw.split(GENRE_SEPARATOR)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// One-shot loader for the read-only catalog file (C1). Opens the SQLite
/// database immutably (`mode=ro&immutable=1`), scans it once for the BPM
/// range, then once more for every non-ignored track.
pub fn load(
    db_path: &str,
    genre_groups_cfg: &[Vec<String>],
    normalize_cfg: &NormalizeConfig,
) -> Result<(FeatureIndex, GenreModel), AppError> {
    let uri = format!("file:{}?mode=ro&immutable=1", db_path);
    let conn = Connection::open_with_flags(
        &uri,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI,
    )
    .map_err(|e| AppError::CatalogUnavailable(format!("cannot open {db_path}: {e}")))?;

    let (min_bpm, max_bpm): (f64, f64) = conn
        .query_row("SELECT min(bpm), max(bpm) FROM tracks", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .map_err(|e| AppError::CatalogUnavailable(format!("catalog missing required columns: {e}")))?;
    let bpm_range = if (max_bpm - min_bpm).abs() < f64::EPSILON {
        1.0
    } else {
        max_bpm - min_bpm
    };

    let query = "SELECT file, title, artist, album, albumartist, genre, duration, ignore, \
                 danceable, aggressive, electronic, acoustic, happy, party, relaxed, sad, dark, \
                 tonal, voice, bpm FROM tracks";
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| AppError::CatalogUnavailable(format!("catalog missing required columns: {e}")))?;

    let mut genre_model = GenreModel::new();
    let mut tracks = Vec::new();
    let mut rows_attribs: Vec<[f64; ATTRIB_COUNT]> = Vec::new();
    let mut by_file = HashMap::new();

    let mut rows = stmt
        .query([])
        .map_err(|e| AppError::CatalogUnavailable(format!("failed to scan catalog: {e}")))?;

    while let Some(row) = rows
        .next()
        .map_err(|e| AppError::CatalogUnavailable(format!("failed to scan catalog: {e}")))?
    {
        let ignore: i64 = row.get(7).unwrap_or(0);
        if ignore == 1 {
            continue; // I2
        }

        let file: String = row.get(0).unwrap_or_default();
        let title: String = row.get(1).unwrap_or_default();
        let artist: String = row.get(2).unwrap_or_default();
        let album: String = row.get(3).unwrap_or_default();
        let albumartist: String = row.get(4).unwrap_or_default();
        let genre_raw: Option<String> = row.get(5).ok();
        let duration: i64 = row.get(6).unwrap_or(0);

        let mut attribs = [0.0f64; ATTRIB_COUNT];
        for (i, name) in ATTRIB_NAMES.iter().enumerate() {
            let raw: f64 = row.get(8 + i).unwrap_or(0.0);
            attribs[i] = if *name == "bpm" {
                (raw - min_bpm) / bpm_range
            } else {
                raw
            };
        }

        let (genres, igenres) = match genre_raw.filter(|g| !g.is_empty()) {
            Some(raw) => {
                let names = genre_separated(&raw);
                let ids = names.iter().map(|g| genre_model.id_for(g)).collect();
                (names, ids)
            }
            None => {
                warn!("no genre for track: {file}");
                (vec![crate::genre::NO_GENRE_NAME.to_string()], vec![crate::genre::NO_GENRE_ID])
            }
        };

        let rowid = tracks.len();
        by_file.insert(file.clone(), rowid);
        tracks.push(Track {
            title_norm: normalize_title(&title, normalize_cfg),
            artist_norm: normalize_artist(&artist, normalize_cfg),
            album_norm: normalize_album(&album, normalize_cfg),
            albumartist_norm: normalize_artist(&albumartist, normalize_cfg),
            file,
            title,
            artist,
            album,
            albumartist,
            duration: duration.max(0) as u32,
            rowid,
            genres,
            igenres,
        });
        rows_attribs.push(attribs);
    }

    if tracks.is_empty() {
        return Err(AppError::CatalogEmpty);
    }

    genre_model.finalize_groups(genre_groups_cfg);

    let n = tracks.len();
    let mut features = Array2::<f64>::zeros((n, VECTOR_DIM));
    for (i, attribs) in rows_attribs.iter().enumerate() {
        for (j, value) in attribs.iter().enumerate() {
            features[[i, j]] = *value;
        }
        features[[i, ATTRIB_COUNT]] = GENRE_SLOT_SENTINEL;
    }

    debug!("loaded {n} tracks ({} genres)", genre_model.num_genres());

    Ok((
        FeatureIndex {
            tracks,
            features,
            by_file,
        },
        genre_model,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> NormalizeConfig {
        NormalizeConfig::defaults()
    }

    #[test]
    fn album_tag_is_stripped_before_punctuation_cleanup() {
        let out = normalize_album("Nevermind (Deluxe Edition)", &cfg());
        assert_eq!(out, "nevermind");
    }

    #[test]
    fn artist_feat_is_truncated_after_position_two() {
        let out = normalize_artist("Daft Punk feat Pharrell", &cfg());
        assert_eq!(out, "daft punk");
    }

    #[test]
    fn artist_feat_before_position_two_is_kept() {
        // "ft" appears at position 0 here; must not truncate to empty.
        let out = normalize_artist("Ft. Lonely", &cfg());
        assert_eq!(out, "ft lonely");
    }

    #[test]
    fn ampersand_is_folded_to_and() {
        assert_eq!(normalize_str("Simon & Garfunkel"), "Simon and Garfunkel");
    }

    fn make_test_db() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE tracks (
                file TEXT, title TEXT, artist TEXT, album TEXT, albumartist TEXT,
                genre TEXT, duration INT, ignore INT, bpm REAL,
                danceable REAL, aggressive REAL, electronic REAL, acoustic REAL,
                happy REAL, party REAL, relaxed REAL, sad REAL, dark REAL,
                tonal REAL, voice REAL
            );
            INSERT INTO tracks VALUES
                ('a.flac','A','Artist A','Album A','Artist A','Pop',200,0,120,
                 0.8,0.1,0.2,0.9,0.7,0.6,0.2,0.1,0.2,0.5,0.1),
                ('b.flac','B','Artist B','Album B','Artist B','Metal',180,0,160,
                 0.1,0.9,0.1,0.1,0.1,0.2,0.1,0.8,0.9,0.3,0.2),
                ('c.flac','C (Live)','Artist C','Album C (Deluxe)','Artist C','',210,1,100,
                 0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5);",
        )
        .unwrap();
        file
    }

    #[test]
    fn load_skips_ignored_tracks_and_assigns_sequential_rowids() {
        let db = make_test_db();
        let (index, genre_model) = load(db.path().to_str().unwrap(), &[], &cfg()).unwrap();
        assert_eq!(index.len(), 2); // track 'c' is ignore=1
        assert_eq!(index.get(0).unwrap().file, "a.flac");
        assert_eq!(index.get(1).unwrap().file, "b.flac");
        assert!(genre_model.num_genres() >= 3); // <NoGenre>, Pop, Metal
    }

    #[test]
    fn bpm_is_min_max_normalized() {
        let db = make_test_db();
        let (index, _genres) = load(db.path().to_str().unwrap(), &[], &cfg()).unwrap();
        let a = index.base_attribs(0);
        let b = index.base_attribs(1);
        assert!((a[11] - 0.0).abs() < 1e-9 || (b[11] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_catalog_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE tracks (file TEXT, title TEXT, artist TEXT, album TEXT, albumartist TEXT,
            genre TEXT, duration INT, ignore INT, bpm REAL, danceable REAL, aggressive REAL,
            electronic REAL, acoustic REAL, happy REAL, party REAL, relaxed REAL, sad REAL,
            dark REAL, tonal REAL, voice REAL);",
        )
        .unwrap();
        let result = load(file.path().to_str().unwrap(), &[], &cfg());
        assert!(matches!(result, Err(AppError::CatalogEmpty)));
    }
}
