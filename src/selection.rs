use std::collections::{HashMap, HashSet};

use log::debug;
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::catalog::{FeatureIndex, Track};
use crate::genre::GenreModel;
use crate::similarity::{SimilarityEngine, DEFAULT_NEIGHBOR_FANOUT};

/// Spec's `shuffle_factor`: how many `count`-multiples of candidates are kept
/// before the final shuffle-and-truncate.
const SHUFFLE_FACTOR: usize = 3;
/// Minimum accepted count the backfill step tries to reach.
const MIN_BACKFILL: usize = 2;
/// Artist alternates are pooled when within this similarity range of the
/// first accepted track for that artist.
const ALTERNATE_SIM_RANGE: f64 = 0.25;

const CHRISTMAS_KEYWORDS: [&str; 5] = ["christmas", "xmas", "noel", "advent", "holiday"];

pub fn is_christmas(track: &Track) -> bool {
    let album = track.album.to_lowercase();
    let title = track.title.to_lowercase();
    CHRISTMAS_KEYWORDS
        .iter()
        .any(|kw| album.contains(kw) || title.contains(kw))
}

fn same_artist_or_album(haystack: &[&Track], track: &Track) -> bool {
    haystack
        .iter()
        .any(|t| t.artist_norm == track.artist_norm || t.album_norm == track.album_norm)
}

fn duration_in_range(duration: u32, min_duration: u32, max_duration: u32) -> bool {
    if min_duration > 0 && duration < min_duration {
        return false;
    }
    if max_duration > 0 && duration > max_duration {
        return false;
    }
    true
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionConfig {
    /// Already clamped to [5, 50] by the request surface.
    pub count: usize,
    pub filter_genre: bool,
    pub filter_xmas: bool,
    pub shuffle: bool,
    pub min_duration: u32,
    pub max_duration: u32,
    pub no_repeat_artist: usize,
    pub no_repeat_album: usize,
}

struct MatchedArtist {
    similarity: f64,
    alternates: Vec<(usize, f64)>,
    pos: usize,
}

/// Runs the full candidate classification/backfill/shuffle pipeline (C5) for
/// one request and returns the final `(rowid, similarity)` list in output
/// order. `match_all_genres_for` lets the caller apply the per-seed
/// `ignoregenre` config rule without this module depending on config types.
#[allow(clippy::too_many_arguments)]
pub fn select(
    index: &FeatureIndex,
    genres: &GenreModel,
    engine: &SimilarityEngine,
    seeds: &[usize],
    previous: &[usize],
    exclude_artists: &[String],
    exclude_albums: &[String],
    seed_genre_union: &HashSet<u32>,
    match_all_genres_for: impl Fn(&Track) -> bool,
    cfg: &SelectionConfig,
) -> Vec<(usize, f64)> {
    let seed_tracks: Vec<&Track> = seeds.iter().filter_map(|&r| index.get(r)).collect();
    let previous_tracks: Vec<&Track> = previous.iter().filter_map(|&r| index.get(r)).collect();

    let mut skip_rows: HashSet<usize> = seeds.iter().copied().collect();
    skip_rows.extend(previous.iter().copied());

    let mut current_titles: Vec<String> = seed_tracks
        .iter()
        .chain(previous_tracks.iter())
        .map(|t| t.title_norm.clone())
        .collect();

    let mut accepted: Vec<(usize, f64)> = Vec::new();
    let mut filtered_seeds: Vec<(usize, f64)> = Vec::new();
    let mut filtered_current: Vec<(usize, f64)> = Vec::new();
    let mut filtered_previous: Vec<(usize, f64)> = Vec::new();
    let mut matched_artists: HashMap<String, MatchedArtist> = HashMap::new();

    let similarity_count = if cfg.shuffle {
        cfg.count * SHUFFLE_FACTOR
    } else {
        cfg.count
    };

    for &seed_rowid in seeds {
        let seed = match index.get(seed_rowid) {
            Some(t) => t,
            None => continue,
        };
        let match_all = match_all_genres_for(seed);
        let neighbors = engine.query(index, genres, seed_rowid, match_all, DEFAULT_NEIGHBOR_FANOUT);

        let mut accepted_this_seed = 0usize;

        for (rowid, sim) in neighbors {
            if accepted_this_seed >= similarity_count {
                break;
            }

            if skip_rows.contains(&rowid) {
                continue;
            }
            let track = match index.get(rowid) {
                Some(t) => t,
                None => continue,
            };
            if !duration_in_range(track.duration, cfg.min_duration, cfg.max_duration) {
                continue;
            }
            if cfg.filter_genre && !match_all && !seed_genre_union.contains(&track.primary_genre()) {
                debug!("DISCARD(genre) {}", track.file);
                continue;
            }
            if cfg.filter_xmas && is_christmas(track) {
                debug!("DISCARD(xmas) {}", track.file);
                continue;
            }
            if !exclude_artists.is_empty() && exclude_artists.contains(&track.artist_norm) {
                debug!("DISCARD(artist) {}", track.file);
                continue;
            }
            if !exclude_albums.is_empty() && exclude_albums.contains(&track.album_norm) {
                debug!("DISCARD(album) {}", track.file);
                continue;
            }

            if same_artist_or_album(&seed_tracks, track) {
                debug!("FILTERED(seeds) {}", track.file);
                filtered_seeds.push((rowid, sim));
                continue;
            }

            let accepted_tracks: Vec<&Track> = accepted.iter().filter_map(|&(r, _)| index.get(r)).collect();
            if same_artist_or_album(&accepted_tracks, track) {
                debug!("FILTERED(current) {}", track.file);
                filtered_current.push((rowid, sim));
                if let Some(ma) = matched_artists.get_mut(&track.artist_norm) {
                    if (sim - ma.similarity).abs() <= ALTERNATE_SIM_RANGE {
                        ma.alternates.push((rowid, sim));
                    }
                }
                continue;
            }

            if cfg.no_repeat_artist > 0
                && previous_tracks
                    .iter()
                    .take(cfg.no_repeat_artist)
                    .any(|t| t.artist_norm == track.artist_norm)
            {
                debug!("FILTERED(previous-artist) {}", track.file);
                filtered_previous.push((rowid, sim));
                continue;
            }
            if cfg.no_repeat_album > 0
                && previous_tracks
                    .iter()
                    .take(cfg.no_repeat_album)
                    .any(|t| t.album_norm == track.album_norm)
            {
                debug!("FILTERED(previous-album) {}", track.file);
                filtered_previous.push((rowid, sim));
                continue;
            }
            if current_titles.contains(&track.title_norm) {
                debug!("FILTERED(title) {}", track.file);
                filtered_previous.push((rowid, sim));
                continue;
            }

            debug!("USABLE {}", track.file);
            let pos = accepted.len();
            accepted.push((rowid, sim));
            skip_rows.insert(rowid);
            current_titles.push(track.title_norm.clone());
            matched_artists.insert(
                track.artist_norm.clone(),
                MatchedArtist {
                    similarity: sim,
                    alternates: vec![(rowid, sim)],
                    pos,
                },
            );
            accepted_this_seed += 1;
        }
    }

    // Artist alternates: swap a uniformly random pick in, keeping the
    // originally accepted track's similarity so ordering stays stable.
    let mut rng = thread_rng();
    for ma in matched_artists.values() {
        if ma.alternates.len() > 1 {
            if let Some(&(chosen_rowid, _)) = ma.alternates.choose(&mut rng) {
                accepted[ma.pos] = (chosen_rowid, ma.similarity);
            }
        }
    }

    // Backfill if too few usables were accepted overall.
    for pool in [&mut filtered_previous, &mut filtered_current, &mut filtered_seeds] {
        if accepted.len() >= MIN_BACKFILL || pool.is_empty() {
            continue;
        }
        pool.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let need = MIN_BACKFILL - accepted.len();
        accepted.extend(pool.drain(..).take(need));
    }

    accepted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    accepted.truncate(similarity_count);

    if cfg.shuffle {
        accepted.shuffle(&mut rng);
    }
    accepted.truncate(cfg.count);
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{self, NormalizeConfig};
    use rusqlite::Connection;

    fn base_cfg(count: usize) -> SelectionConfig {
        SelectionConfig {
            count,
            filter_genre: false,
            filter_xmas: false,
            shuffle: false,
            min_duration: 0,
            max_duration: 0,
            no_repeat_artist: 15,
            no_repeat_album: 25,
        }
    }

    fn scenario_db(rows: &[&str]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE tracks (
                file TEXT, title TEXT, artist TEXT, album TEXT, albumartist TEXT,
                genre TEXT, duration INT, ignore INT, bpm REAL,
                danceable REAL, aggressive REAL, electronic REAL, acoustic REAL,
                happy REAL, party REAL, relaxed REAL, sad REAL, dark REAL,
                tonal REAL, voice REAL
            );",
        )
        .unwrap();
        for row in rows {
            conn.execute_batch(row).unwrap();
        }
        file
    }

    /// Scenario #1: A is seed; B is acoustically close; C is far. Expect
    /// order [B, C].
    #[test]
    fn scenario_one_orders_by_similarity() {
        let db = scenario_db(&[
            "INSERT INTO tracks VALUES ('a.flac','A','X','Alb A','X','Pop',200,0,120,0.8,0.1,0.2,0.9,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
            "INSERT INTO tracks VALUES ('b.flac','B','Y','Alb B','Y','Pop',200,0,120,0.79,0.11,0.2,0.89,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
            "INSERT INTO tracks VALUES ('c.flac','C','Z','Alb C','Z','Metal',200,0,120,0.1,0.9,0.8,0.1,0.1,0.1,0.1,0.9,0.9,0.5,0.3);",
        ]);
        let (index, genres) = catalog::load(db.path().to_str().unwrap(), &[], &NormalizeConfig::defaults()).unwrap();
        let engine = SimilarityEngine::new();
        let result = select(
            &index,
            &genres,
            &engine,
            &[0],
            &[],
            &[],
            &[],
            &HashSet::new(),
            |_| false,
            &base_cfg(5),
        );
        assert_eq!(result.iter().map(|(r, _)| *r).collect::<Vec<_>>(), vec![1, 2]);
        assert!(result[0].1 < result[1].1);
    }

    /// Scenario #2: same library, excludeartist=[Y]. Expect [C].
    #[test]
    fn scenario_two_excludes_artist() {
        let db = scenario_db(&[
            "INSERT INTO tracks VALUES ('a.flac','A','X','Alb A','X','Pop',200,0,120,0.8,0.1,0.2,0.9,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
            "INSERT INTO tracks VALUES ('b.flac','B','Y','Alb B','Y','Pop',200,0,120,0.79,0.11,0.2,0.89,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
            "INSERT INTO tracks VALUES ('c.flac','C','Z','Alb C','Z','Metal',200,0,120,0.1,0.9,0.8,0.1,0.1,0.1,0.1,0.9,0.9,0.5,0.3);",
        ]);
        let (index, genres) = catalog::load(db.path().to_str().unwrap(), &[], &NormalizeConfig::defaults()).unwrap();
        let engine = SimilarityEngine::new();
        let exclude = vec![catalog::normalize_artist("Y", &NormalizeConfig::defaults())];
        let result = select(
            &index,
            &genres,
            &engine,
            &[0],
            &[],
            &exclude,
            &[],
            &HashSet::new(),
            |_| false,
            &base_cfg(5),
        );
        assert_eq!(result.iter().map(|(r, _)| *r).collect::<Vec<_>>(), vec![2]);
    }

    /// Scenario #3: 100 identical-attribute tracks, distinct artists, one
    /// seed. Expect 5 unique artists.
    #[test]
    fn scenario_three_filters_duplicate_artists_via_current_bucket() {
        let mut rows = Vec::new();
        for i in 0..100 {
            rows.push(format!(
                "INSERT INTO tracks VALUES ('t{i}.flac','T{i}','Artist{i}','Alb{i}','Artist{i}','Pop',200,0,120,\
                 0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5);"
            ));
        }
        let row_refs: Vec<&str> = rows.iter().map(|s| s.as_str()).collect();
        let db = scenario_db(&row_refs);
        let (index, genres) = catalog::load(db.path().to_str().unwrap(), &[], &NormalizeConfig::defaults()).unwrap();
        let engine = SimilarityEngine::new();
        let result = select(
            &index,
            &genres,
            &engine,
            &[0],
            &[],
            &[],
            &[],
            &HashSet::new(),
            |_| false,
            &base_cfg(5),
        );
        assert_eq!(result.len(), 5);
        let artists: HashSet<usize> = result.iter().map(|(r, _)| *r).collect();
        assert_eq!(artists.len(), 5); // all distinct rowids => distinct artists by construction
    }

    /// Scenario #5: xmas filter excludes a Christmas-titled track outside
    /// December but allows it through with the filter off.
    #[test]
    fn scenario_five_xmas_filter_toggle() {
        let db = scenario_db(&[
            "INSERT INTO tracks VALUES ('a.flac','A','X','Alb A','X','Pop',200,0,120,0.8,0.1,0.2,0.9,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
            "INSERT INTO tracks VALUES ('b.flac','Last Christmas','Y','Alb B','Y','Pop',200,0,120,0.79,0.11,0.2,0.89,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
            "INSERT INTO tracks VALUES ('c.flac','C','Z','Alb C','Z','Pop',200,0,120,0.78,0.12,0.2,0.88,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
        ]);
        let (index, genres) = catalog::load(db.path().to_str().unwrap(), &[], &NormalizeConfig::defaults()).unwrap();
        let engine = SimilarityEngine::new();

        let mut cfg = base_cfg(5);
        cfg.filter_xmas = true;
        let result = select(&index, &genres, &engine, &[0], &[], &[], &[], &HashSet::new(), |_| false, &cfg);
        assert!(!result.iter().any(|(r, _)| *r == 1));

        cfg.filter_xmas = false;
        let result = select(&index, &genres, &engine, &[0], &[], &[], &[], &HashSet::new(), |_| false, &cfg);
        assert!(result.iter().any(|(r, _)| *r == 1));
    }

    #[test]
    fn backfill_tops_up_to_min_count_when_everything_else_is_filtered() {
        // Two tracks share seed's artist/album, so both land in filtered_seeds.
        let db = scenario_db(&[
            "INSERT INTO tracks VALUES ('a.flac','A','X','Alb A','X','Pop',200,0,120,0.8,0.1,0.2,0.9,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
            "INSERT INTO tracks VALUES ('b.flac','B','X','Alb A','X','Pop',200,0,120,0.79,0.11,0.2,0.89,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
            "INSERT INTO tracks VALUES ('c.flac','C','X','Alb A','X','Pop',200,0,120,0.78,0.12,0.2,0.88,0.7,0.6,0.2,0.1,0.2,0.5,0.1);",
        ]);
        let (index, genres) = catalog::load(db.path().to_str().unwrap(), &[], &NormalizeConfig::defaults()).unwrap();
        let engine = SimilarityEngine::new();
        let result = select(
            &index,
            &genres,
            &engine,
            &[0],
            &[],
            &[],
            &[],
            &HashSet::new(),
            |_| false,
            &base_cfg(5),
        );
        assert_eq!(result.len(), 2); // backfilled from filtered_seeds
    }
}
