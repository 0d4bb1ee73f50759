/// Marker substituted for `#` when a cue-sheet-indexed path is stored
/// on disk as its own pseudo-file (e.g. `album.cue#3` -> `album.CUE_TRACK.3.mp3`).
pub const CUE_TRACK: &str = ".CUE_TRACK.";

/// Encodes a `#`-addressed cue path into its on-disk pseudo-file form.
/// Paths with no `#` (or a leading one) pass through unchanged.
pub fn convert_from_cue_path(path: &str) -> String {
    match path.find('#') {
        Some(pos) if pos > 0 => format!("{}.mp3", path.replace('#', CUE_TRACK)),
        _ => path.to_string(),
    }
}

/// Percent-encodes `path`, leaving `/` unescaped, matching
/// `urllib.parse.quote`'s default `safe='/'`.
fn quote_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Inverse of [`convert_from_cue_path`]: turns the on-disk pseudo-file form
/// back into a `file://...#track` URL. Paths with no cue marker pass through
/// unchanged.
pub fn convert_to_cue_url(path: &str) -> String {
    match path.find(CUE_TRACK) {
        Some(pos) if pos > 0 => {
            let replaced = path.replace(CUE_TRACK, "#");
            let mut parts = replaced.splitn(2, '#');
            let base = parts.next().unwrap_or("");
            let track = parts.next().unwrap_or("");
            let full = format!("file://{}#{}", quote_path(base), track);
            full[..full.len() - 4].to_string() // drop the synthetic ".mp3"
        }
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_cue_path_passes_through() {
        assert_eq!(convert_from_cue_path("/music/a.flac"), "/music/a.flac");
        assert_eq!(convert_to_cue_url("/music/a.flac"), "/music/a.flac");
    }

    #[test]
    fn cue_path_round_trips_through_url_form() {
        let on_disk = convert_from_cue_path("/music/album.cue#3");
        assert_eq!(on_disk, "/music/album.CUE_TRACK.3.mp3");
        let url = convert_to_cue_url(&on_disk);
        assert_eq!(url, "file:///music/album.cue#3");
    }

    #[test]
    fn cue_url_leaves_path_separators_unescaped() {
        let on_disk = convert_from_cue_path("/music/Artist & Band/album.cue#3");
        let url = convert_to_cue_url(&on_disk);
        assert_eq!(url, "file:///music/Artist%20%26%20Band/album.cue#3");
    }
}
