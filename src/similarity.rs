use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use kdtree::distance::squared_euclidean;
use kdtree::KdTree;

use crate::catalog::{FeatureIndex, ATTRIB_COUNT, VECTOR_DIM};
use crate::genre::GenreModel;

/// Normalizing constant for reported similarity: the farthest two points in
/// a [0,1]^13 cube can be is `sqrt(13)`.
pub const MAX_SIM: f64 = 3.605_551_275_463_989; // 13_f64.sqrt()

/// Raw k-NN breadth requested from the tree before the selection pipeline
/// classifies anything, independent of the request's final `count`.
pub const DEFAULT_NEIGHBOR_FANOUT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TreeKey {
    match_all_genres: bool,
    seed_primary_genre: u32,
}

struct CachedTree {
    key: TreeKey,
    tree: KdTree<f64, usize, [f64; VECTOR_DIM]>,
}

/// Owns the process-wide mutable "genre dimension" and its k-d tree cache
/// (C4). One instance is shared across all requests behind an exclusive
/// lock; the lock is held for the duration of a potential rebuild plus the
/// k-NN query that follows it (§5).
pub struct SimilarityEngine {
    cache: Mutex<Option<CachedTree>>,
    builds: AtomicU64,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityEngine {
    pub fn new() -> Self {
        SimilarityEngine {
            cache: Mutex::new(None),
            builds: AtomicU64::new(0),
        }
    }

    /// Number of tree rebuilds performed so far. Test-mode-only
    /// instrumentation for P6/#6 (cache-hit verification); harmless to
    /// expose in production.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    fn point_for(index: &FeatureIndex, genres: &GenreModel, rowid: usize, key: TreeKey) -> [f64; VECTOR_DIM] {
        let attribs = index.base_attribs(rowid);
        let mut point = [0.0; VECTOR_DIM];
        point[..ATTRIB_COUNT].copy_from_slice(&attribs);
        let track = index.get(rowid).expect("rowid in range");
        point[ATTRIB_COUNT] = if key.match_all_genres {
            0.0
        } else {
            genres.diff(key.seed_primary_genre, track.primary_genre()) as f64
        };
        point
    }

    fn rebuild(&self, index: &FeatureIndex, genres: &GenreModel, key: TreeKey) -> KdTree<f64, usize, [f64; VECTOR_DIM]> {
        let mut tree = KdTree::new(VECTOR_DIM);
        for rowid in 0..index.len() {
            let point = Self::point_for(index, genres, rowid, key);
            let _ = tree.add(point, rowid);
        }
        self.builds.fetch_add(1, Ordering::Relaxed);
        tree
    }

    /// Returns the `k` nearest catalog entries to `seed_rowid`, ascending by
    /// similarity, excluding the seed itself. `k` should already include any
    /// skip/seed slack the caller wants (§4.4: `count + num_skip + 1`).
    pub fn query(
        &self,
        index: &FeatureIndex,
        genres: &GenreModel,
        seed_rowid: usize,
        match_all_genres: bool,
        k: usize,
    ) -> Vec<(usize, f64)> {
        if index.is_empty() {
            return Vec::new();
        }
        let seed = match index.get(seed_rowid) {
            Some(t) => t,
            None => return Vec::new(),
        };
        let key = TreeKey {
            match_all_genres,
            seed_primary_genre: seed.primary_genre(),
        };

        let mut guard = self.cache.lock().expect("similarity cache poisoned");
        let needs_rebuild = match guard.as_ref() {
            Some(cached) => cached.key != key,
            None => true,
        };
        if needs_rebuild {
            let tree = self.rebuild(index, genres, key);
            *guard = Some(CachedTree { key, tree });
        }
        let cached = guard.as_ref().expect("just populated");

        let mut seed_point = Self::point_for(index, genres, seed_rowid, key);
        seed_point[ATTRIB_COUNT] = 0.0; // seed sits at the origin of the genre dimension

        let want = k.max(1);
        let results = match cached.tree.nearest(&seed_point, want, &squared_euclidean) {
            Ok(r) => r,
            Err(_) => return Vec::new(),
        };

        results
            .into_iter()
            .filter(|(_, &rowid)| rowid != seed_rowid)
            .map(|(sq_dist, &rowid)| (rowid, sq_dist.sqrt() / MAX_SIM))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{self, NormalizeConfig};
    use rusqlite::Connection;

    fn build_catalog() -> (FeatureIndex, GenreModel, tempfile::NamedTempFile) {
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
                ('a.flac','A','X','Alb A','X','Pop',200,0,120,0.8,0.1,0.2,0.9,0.7,0.6,0.2,0.1,0.2,0.5,0.1),
                ('b.flac','B','Y','Alb B','Y','Pop',200,0,120,0.79,0.11,0.2,0.89,0.7,0.6,0.2,0.1,0.2,0.5,0.1),
                ('c.flac','C','Z','Alb C','Z','Metal',200,0,120,0.1,0.9,0.8,0.1,0.1,0.1,0.1,0.9,0.9,0.5,0.3);",
        )
        .unwrap();
        let (index, genres) = catalog::load(file.path().to_str().unwrap(), &[], &NormalizeConfig::defaults()).unwrap();
        (index, genres, file)
    }

    #[test]
    fn nearest_excludes_seed_and_orders_by_distance() {
        let (index, genres, _file) = build_catalog();
        let engine = SimilarityEngine::new();
        let results = engine.query(&index, &genres, 0, false, 3);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1); // B is close to A
        assert_eq!(results[1].0, 2); // C is far
        assert!(results[0].1 < results[1].1);
    }

    #[test]
    fn repeated_query_with_same_seed_genre_does_not_rebuild() {
        let (index, genres, _file) = build_catalog();
        let engine = SimilarityEngine::new();
        engine.query(&index, &genres, 0, false, 3);
        let after_first = engine.build_count();
        engine.query(&index, &genres, 0, false, 3);
        assert_eq!(engine.build_count(), after_first);
    }

    #[test]
    fn changing_seed_primary_genre_triggers_rebuild() {
        let (index, genres, _file) = build_catalog();
        let engine = SimilarityEngine::new();
        engine.query(&index, &genres, 0, false, 3); // seed A: Pop
        let after_first = engine.build_count();
        engine.query(&index, &genres, 2, false, 3); // seed C: Metal
        assert!(engine.build_count() > after_first);
    }

    #[test]
    fn similarity_values_stay_in_unit_range() {
        let (index, genres, _file) = build_catalog();
        let engine = SimilarityEngine::new();
        for (_, sim) in engine.query(&index, &genres, 0, false, 3) {
            assert!((0.0..=1.0).contains(&sim));
        }
    }
}
