//! Subtitle side-file detection, language inference and extraction.
//!
//! Language inference is a two-stage heuristic: a keyword table for 17
//! languages, then a filename-suffix pattern for 2-letter ISO 639-1 codes.
//! The detector is advisory; false positives on short codes are accepted.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use super::torrent::{TorrentFileEntry, TorrentHandle};
use crate::SessionError;
use crate::session::{ExtractedSubtitle, SubtitleTrack};

/// Extensions treated as subtitle side-files.
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "ass", "ssa", "sub", "sbv", "json"];

/// Language keywords matched as substrings of the lowercased filename.
const LANGUAGE_KEYWORDS: &[(&str, &str)] = &[
    ("english", "eng"),
    ("hindi", "hin"),
    ("tamil", "tam"),
    ("telugu", "tel"),
    ("kannada", "kan"),
    ("malayalam", "mal"),
    ("marathi", "mar"),
    ("bengali", "ben"),
    ("spanish", "spa"),
    ("espanol", "spa"),
    ("french", "fra"),
    ("francais", "fra"),
    ("german", "deu"),
    ("deutsch", "deu"),
    ("portuguese", "por"),
    ("russian", "rus"),
    ("japanese", "jpn"),
    ("chinese", "zho"),
    ("arabic", "ara"),
    ("thai", "tha"),
];

/// 2-letter ISO 639-1 aliases mapped to the 3-letter table.
const ISO_639_1: &[(&str, &str)] = &[
    ("en", "eng"),
    ("hi", "hin"),
    ("ta", "tam"),
    ("te", "tel"),
    ("kn", "kan"),
    ("ml", "mal"),
    ("mr", "mar"),
    ("bn", "ben"),
    ("es", "spa"),
    ("fr", "fra"),
    ("de", "deu"),
    ("pt", "por"),
    ("ru", "rus"),
    ("ja", "jpn"),
    ("zh", "zho"),
    ("ar", "ara"),
    ("th", "tha"),
];

/// Language codes the detector can produce.
pub fn supported_languages() -> Vec<&'static str> {
    let mut codes: Vec<&'static str> = LANGUAGE_KEYWORDS.iter().map(|(_, code)| *code).collect();
    codes.dedup();
    codes
}

fn iso_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\.(en|hi|ta|te|kn|ml|mr|bn|es|fr|de|pt|ru|ja|zh|ar|th)[._-]")
            .expect("subtitle language pattern is valid")
    })
}

/// Infers a 3-letter language code from a subtitle filename.
///
/// Stage one matches full language names as substrings; stage two looks for
/// a dotted 2-letter ISO code like `movie.en.srt`. Returns `"unknown"` when
/// neither matches.
pub fn detect_language(filename: &str) -> &'static str {
    let lowered = filename.to_ascii_lowercase();

    for (keyword, code) in LANGUAGE_KEYWORDS {
        if lowered.contains(keyword) {
            return code;
        }
    }

    if let Some(captures) = iso_suffix_pattern().captures(&lowered) {
        let short = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        for (alias, code) in ISO_639_1 {
            if *alias == short {
                return code;
            }
        }
    }

    "unknown"
}

/// Whether the filename carries a subtitle extension.
pub fn is_subtitle(name: &str) -> bool {
    super::extension_of(name)
        .map(|ext| SUBTITLE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Scans torrent files for subtitle side-files.
pub fn detect_subtitles(files: &[TorrentFileEntry]) -> Vec<SubtitleTrack> {
    files
        .iter()
        .filter(|file| is_subtitle(&file.name))
        .map(|file| SubtitleTrack {
            name: file.name.clone(),
            ext: super::extension_of(&file.name).unwrap_or_default(),
            size: file.length,
            language: detect_language(&file.name).to_string(),
        })
        .collect()
}

/// Read chunk used while streaming subtitle bytes out of the torrent.
const EXTRACT_CHUNK: usize = 64 * 1024;

/// Streams one subtitle out of the torrent into the session folder.
async fn extract_one(
    handle: &Arc<dyn TorrentHandle>,
    folder: &Path,
    track: &SubtitleTrack,
) -> Result<ExtractedSubtitle, SessionError> {
    let entry = handle
        .files()
        .into_iter()
        .find(|f| f.name == track.name)
        .ok_or_else(|| SessionError::Torrent(format!("subtitle {} disappeared", track.name)))?;

    let target = folder.join(format!("subtitle_{}.{}", track.language, track.ext));
    let mut out = tokio::fs::File::create(&target)
        .await
        .map_err(|e| SessionError::Storage(format!("creating {}: {e}", target.display())))?;

    let mut offset = 0u64;
    while offset < entry.length {
        let chunk = EXTRACT_CHUNK.min((entry.length - offset) as usize);
        let bytes = handle
            .read_at(entry.index, offset, chunk)
            .await
            .map_err(|e| SessionError::Torrent(e.to_string()))?;
        tokio::io::AsyncWriteExt::write_all(&mut out, &bytes)
            .await
            .map_err(|e| SessionError::Storage(format!("writing {}: {e}", target.display())))?;
        offset += bytes.len() as u64;
    }

    Ok(ExtractedSubtitle {
        name: track.name.clone(),
        path: target,
        language: track.language.clone(),
        ext: track.ext.clone(),
        size: entry.length,
    })
}

/// Extracts every detected subtitle concurrently.
///
/// Extraction failures are logged, never fatal: the stream plays without the
/// affected subtitle. When two tracks infer the same language and extension
/// the first one wins.
pub async fn extract_all(
    handle: Arc<dyn TorrentHandle>,
    folder: &Path,
    tracks: &[SubtitleTrack],
) -> Vec<ExtractedSubtitle> {
    let mut unique: Vec<&SubtitleTrack> = Vec::new();
    for track in tracks {
        if !unique
            .iter()
            .any(|t| t.language == track.language && t.ext == track.ext)
        {
            unique.push(track);
        }
    }

    let jobs = unique.into_iter().map(|track| {
        let handle = Arc::clone(&handle);
        let folder = folder.to_path_buf();
        let track = track.clone();
        tokio::spawn(async move { extract_one(&handle, &folder, &track).await })
    });

    let mut extracted = Vec::new();
    for job in jobs.collect::<Vec<_>>() {
        match job.await {
            Ok(Ok(subtitle)) => {
                debug!(path = %subtitle.path.display(), "subtitle extracted");
                extracted.push(subtitle);
            }
            Ok(Err(e)) => warn!(error = %e, "subtitle extraction failed"),
            Err(e) => warn!(error = %e, "subtitle extraction task panicked"),
        }
    }
    extracted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_stage_matches_full_names() {
        assert_eq!(detect_language("Movie.English.srt"), "eng");
        assert_eq!(detect_language("movie_hindi_subs.vtt"), "hin");
        assert_eq!(detect_language("FILM.ESPANOL.ass"), "spa");
        assert_eq!(detect_language("serie.francais.srt"), "fra");
    }

    #[test]
    fn iso_stage_matches_dotted_suffixes() {
        assert_eq!(detect_language("movie.en.srt"), "eng");
        assert_eq!(detect_language("movie.zh_forced.srt"), "zho");
        assert_eq!(detect_language("movie.pt-br.vtt"), "por");
    }

    #[test]
    fn keyword_stage_wins_over_iso_stage() {
        // "japanese" keyword decides before the ".en." suffix is consulted
        assert_eq!(detect_language("japanese.en.srt"), "jpn");
    }

    #[test]
    fn unmatched_names_are_unknown() {
        assert_eq!(detect_language("movie.srt"), "unknown");
        assert_eq!(detect_language("movie.english_but_actually.xx.srt"), "eng");
        assert_eq!(detect_language("movie.xx.srt"), "unknown");
    }

    #[test]
    fn subtitle_extension_filter() {
        assert!(is_subtitle("a.srt"));
        assert!(is_subtitle("b.VTT"));
        assert!(is_subtitle("c.json"));
        assert!(!is_subtitle("d.mp4"));
    }

    #[test]
    fn detect_subtitles_scans_all_files() {
        let files = vec![
            TorrentFileEntry {
                index: 0,
                name: "movie.mkv".into(),
                length: 1000,
            },
            TorrentFileEntry {
                index: 1,
                name: "movie.en.srt".into(),
                length: 500,
            },
            TorrentFileEntry {
                index: 2,
                name: "readme.txt".into(),
                length: 10,
            },
        ];
        let tracks = detect_subtitles(&files);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].language, "eng");
        assert_eq!(tracks[0].ext, "srt");
        assert_eq!(tracks[0].size, 500);
    }

    #[test]
    fn supported_language_table_is_complete() {
        let codes = supported_languages();
        for expected in [
            "eng", "hin", "tam", "tel", "kan", "mal", "mar", "ben", "spa", "fra", "deu", "por",
            "rus", "jpn", "zho", "ara", "tha",
        ] {
            assert!(codes.contains(&expected), "missing {expected}");
        }
    }
}
