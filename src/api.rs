use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Datelike;
use log::debug;
use serde_json::{json, Value};

use crate::catalog::{self, FeatureIndex, Track};
use crate::config::Config;
use crate::cue;
use crate::error::AppError;
use crate::genre::GenreModel;
use crate::selection::{self, SelectionConfig};
use crate::similarity::SimilarityEngine;

const DEFAULT_COUNT: usize = 5;
const MIN_COUNT: usize = 5;
const MAX_COUNT: usize = 50;
const DEFAULT_NOREPART: usize = 15;
const DEFAULT_NOREPALB: usize = 25;
const MAX_NOREP: usize = 200;
const DEFAULT_DUMP_COUNT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<FeatureIndex>,
    pub genres: Arc<GenreModel>,
    pub engine: Arc<SimilarityEngine>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/similar", get(similar_get).post(similar_post))
        .route("/api/dump", get(dump_get).post(dump_post))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Unifies GET's repeatable query parameters and POST's JSON-array body so
/// handlers can share one implementation, matching `get_value()`'s
/// GET-is-always-a-list / POST-is-whatever-was-sent split in the original.
enum Params {
    Get(HashMap<String, Vec<String>>),
    Post(Value),
}

impl Params {
    fn from_query(raw: Option<String>) -> Self {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(raw) = raw {
            for pair in raw.split('&').filter(|s| !s.is_empty()) {
                let mut it = pair.splitn(2, '=');
                let key = it.next().unwrap_or("");
                let value = it.next().unwrap_or("");
                let key = urlencoding::decode(key).map(|c| c.into_owned()).unwrap_or_else(|_| key.to_string());
                let value = urlencoding::decode(value)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| value.to_string())
                    .replace('+', " ");
                map.entry(key).or_default().push(value);
            }
        }
        Params::Get(map)
    }

    fn all(&self, key: &str) -> Vec<String> {
        match self {
            Params::Get(map) => map.get(key).cloned().unwrap_or_default(),
            Params::Post(value) => value
                .get(key)
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().map(value_to_string).collect())
                .unwrap_or_default(),
        }
    }

    fn one(&self, key: &str, default: &str) -> String {
        match self {
            Params::Get(map) => map.get(key).and_then(|v| v.first()).cloned().unwrap_or_else(|| default.to_string()),
            Params::Post(value) => value.get(key).map(value_to_string).unwrap_or_else(|| default.to_string()),
        }
    }

    fn has_any(&self) -> bool {
        match self {
            Params::Get(map) => !map.is_empty(),
            Params::Post(value) => value.as_object().map(|o| !o.is_empty()).unwrap_or(false),
        }
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
        other => other.to_string(),
    }
}

fn decode_path(raw: &str, root: &str) -> String {
    let decoded = urlencoding::decode(raw).map(|c| c.into_owned()).unwrap_or_else(|_| raw.to_string());
    let stripped = decoded
        .strip_prefix("file://")
        .or_else(|| decoded.strip_prefix("tmp://"))
        .unwrap_or(&decoded);
    let stripped = stripped.strip_prefix(root).unwrap_or(stripped);
    cue::convert_from_cue_path(stripped)
}

fn encode_path(file: &str, root: &str) -> String {
    cue::convert_to_cue_url(&format!("{root}{file}"))
}

fn resolve_tracks<'a>(index: &'a FeatureIndex, paths: &[String], root: &str) -> Vec<&'a Track> {
    paths
        .iter()
        .filter_map(|raw| {
            let decoded = decode_path(raw, root);
            let track = index.lookup_by_file(&decoded);
            if track.is_none() {
                debug!("could not locate {decoded} in catalog");
            }
            track
        })
        .collect()
}

fn parse_bool(s: &str) -> bool {
    s == "1"
}

fn parse_usize(s: &str, default: usize) -> usize {
    s.parse().unwrap_or(default)
}

fn parse_u32(s: &str, default: u32) -> u32 {
    s.parse().unwrap_or(default)
}

async fn similar_get(State(state): State<AppState>, RawQuery(raw): RawQuery) -> Response {
    handle_similar(state, Params::from_query(raw)).await
}

async fn similar_post(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    handle_similar(state, Params::Post(body)).await
}

async fn handle_similar(state: AppState, params: Params) -> Response {
    match similar_impl(&state, &params).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn similar_impl(state: &AppState, params: &Params) -> Result<Response, AppError> {
    if !params.has_any() {
        return Err(AppError::BadRequest("empty request".to_string()));
    }
    let track_paths = params.all("track");
    if track_paths.is_empty() {
        return Err(AppError::BadRequest("missing 'track' parameter".to_string()));
    }

    let root = &state.config.lms_root;
    let seeds = resolve_tracks(&state.index, &track_paths, root);
    if seeds.is_empty() {
        return Err(AppError::BadRequest("no usable seed track".to_string()));
    }

    let previous_paths = params.all("previous");
    let previous = resolve_tracks(&state.index, &previous_paths, root);

    let exclude_key_paths = {
        let by_exclude_artist = params.all("excludeartist");
        if !by_exclude_artist.is_empty() {
            by_exclude_artist
        } else {
            params.all("exclude")
        }
    };
    let exclude_artists: Vec<String> = exclude_key_paths
        .iter()
        .map(|a| catalog::normalize_artist(a.trim(), &state.config.normalize))
        .collect();
    let exclude_albums: Vec<String> = params
        .all("excludealbum")
        .iter()
        .map(|a| catalog::normalize_album(a.trim(), &state.config.normalize))
        .collect();

    let mut count = parse_usize(&params.one("count", &DEFAULT_COUNT.to_string()), DEFAULT_COUNT);
    count = count.clamp(MIN_COUNT, MAX_COUNT);

    let filter_genre = parse_bool(&params.one("filtergenre", "0"));
    let shuffle = parse_bool(&params.one("shuffle", "1"));
    let min_duration = parse_u32(&params.one("min", "0"), 0);
    let max_duration = parse_u32(&params.one("max", "0"), 0);
    let mut norepart = parse_usize(&params.one("norepart", &DEFAULT_NOREPART.to_string()), DEFAULT_NOREPART);
    norepart = norepart.min(MAX_NOREP);
    let mut norepalb = parse_usize(&params.one("norepalb", &DEFAULT_NOREPALB.to_string()), DEFAULT_NOREPALB);
    norepalb = norepalb.min(MAX_NOREP);
    let current_month_is_december = chrono::Local::now().month() == 12;
    let filter_xmas = parse_bool(&params.one("filterxmas", "0")) && !current_month_is_december;
    let format = params.one("format", "");

    let seed_genre_ids: Vec<u32> = seeds.iter().flat_map(|t| t.igenres.iter().copied()).collect();
    let seed_genre_union: HashSet<u32> = state.genres.group_union_for_genres(&seed_genre_ids);

    let seed_rowids: Vec<usize> = seeds.iter().map(|t| t.rowid).collect();
    let previous_rowids: Vec<usize> = previous.iter().map(|t| t.rowid).collect();

    let cfg = &state.config;
    let selection_cfg = SelectionConfig {
        count,
        filter_genre,
        filter_xmas,
        shuffle,
        min_duration,
        max_duration,
        no_repeat_artist: norepart,
        no_repeat_album: norepalb,
    };

    let results = selection::select(
        &state.index,
        &state.genres,
        &state.engine,
        &seed_rowids,
        &previous_rowids,
        &exclude_artists,
        &exclude_albums,
        &seed_genre_union,
        |track| {
            cfg.ignoregenre
                .as_ref()
                .map(|ig| ig.matches(&track.artist))
                .unwrap_or(false)
        },
        &selection_cfg,
    );

    let urls: Vec<String> = results
        .iter()
        .filter_map(|(rowid, _)| state.index.get(*rowid))
        .map(|t| encode_path(&t.file, root))
        .collect();

    if format == "text" {
        Ok(urls.join("\n").into_response())
    } else {
        Ok(Json(urls).into_response())
    }
}

async fn dump_get(State(state): State<AppState>, RawQuery(raw): RawQuery) -> Response {
    handle_dump(state, Params::from_query(raw)).await
}

async fn dump_post(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    handle_dump(state, Params::Post(body)).await
}

async fn handle_dump(state: AppState, params: Params) -> Response {
    match dump_impl(&state, &params).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn dump_impl(state: &AppState, params: &Params) -> Result<Response, AppError> {
    let track_paths = params.all("track");
    if track_paths.len() != 1 {
        return Err(AppError::BadRequest("'track' must name exactly one seed".to_string()));
    }

    let root = &state.config.lms_root;
    let decoded = decode_path(&track_paths[0], root);
    let seed = state
        .index
        .lookup_by_file(&decoded)
        .ok_or_else(|| AppError::UnknownTrack(decoded.clone()))?;

    let match_all_genres = parse_bool(&params.one("matchallgenres", "0"));
    // `filterartist` is the spec's name for this same/dump parameter, but the
    // original only ever reads `sameartist`; OR-ing `filterartist` in here
    // would flip its meaning (1 meaning "allow" rather than "filter out").
    let allow_same_artist = parse_bool(&params.one("sameartist", "0"));
    let count = parse_usize(&params.one("count", &DEFAULT_DUMP_COUNT.to_string()), DEFAULT_DUMP_COUNT);
    let format = params.one("format", "");

    let neighbors = state.engine.query(&state.index, &state.genres, seed.rowid, match_all_genres, count + 1);
    let filtered: Vec<(usize, f64)> = neighbors
        .into_iter()
        .filter(|(rowid, _)| {
            allow_same_artist
                || state
                    .index
                    .get(*rowid)
                    .map(|t| t.artist_norm != seed.artist_norm)
                    .unwrap_or(false)
        })
        .take(count)
        .collect();

    if format == "text-url" {
        let mut lines = vec![encode_path(&seed.file, root)];
        lines.extend(
            filtered
                .iter()
                .filter_map(|(rowid, _)| state.index.get(*rowid))
                .map(|t| encode_path(&t.file, root)),
        );
        return Ok(lines.join("\n").into_response());
    }

    if format == "text" || format == "textall" {
        let mut header = "file\tsimilarity\tgenres".to_string();
        if format == "textall" {
            for name in catalog::ATTRIB_NAMES {
                header.push('\t');
                header.push_str(name);
            }
        }
        let mut lines = vec![header];
        for (rowid, sim) in &filtered {
            if let Some(track) = state.index.get(*rowid) {
                let mut line = format!("{}\t{}\t{}", track.file, sim, track.genres.join(";"));
                if format == "textall" {
                    let attribs = state.index.base_attribs(*rowid);
                    for value in attribs {
                        line.push('\t');
                        line.push_str(&value.to_string());
                    }
                }
                lines.push(line);
            }
        }
        return Ok(lines.join("\n").into_response());
    }

    let entries: Vec<Value> = filtered
        .iter()
        .filter_map(|(rowid, sim)| {
            let track = state.index.get(*rowid)?;
            let attribs = state.index.base_attribs(*rowid);
            let mut obj = json!({
                "file": track.file,
                "similarity": sim,
                "genres": track.genres,
            });
            if let Value::Object(map) = &mut obj {
                for (name, value) in catalog::ATTRIB_NAMES.iter().zip(attribs.iter()) {
                    map.insert((*name).to_string(), json!(value));
                }
            }
            Some(obj)
        })
        .collect();
    Ok(Json(entries).into_response())
}

async fn healthz(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "ok",
        "tracks": state.index.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}
