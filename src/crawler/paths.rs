//! Download path derivation
//!
//! Composer and piece names become directory names: accents are folded to
//! plain ASCII, spaces become underscores, and anything a filesystem might
//! object to is dropped.

use std::path::{Path, PathBuf};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Name used when sanitizing leaves nothing behind
const EMPTY_SEGMENT: &str = "_";

/// Folds text to ASCII, dropping accents and any character without an
/// ASCII decomposition
pub fn ascii_fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(char::is_ascii)
        .collect()
}

/// Turns a display name into a single safe path segment
pub fn sanitize_segment(name: &str) -> String {
    let folded = ascii_fold(name);
    let segment: String = folded
        .trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() => Some(c),
            '-' | '_' | '.' | ',' | '(' | ')' | '\'' => Some(c),
            _ => None,
        })
        .collect();

    let segment = segment.trim_matches('.');
    if segment.is_empty() {
        EMPTY_SEGMENT.to_string()
    } else {
        segment.to_string()
    }
}

/// Directory holding the files of one piece
pub fn piece_directory(root: &Path, composer: &str, piece: &str) -> PathBuf {
    root.join(sanitize_segment(composer))
        .join(sanitize_segment(piece))
}

/// Last path segment of a link, ignoring query and fragment
fn last_segment(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Lower-cased file extension of a link
pub fn extension_of(url: &str) -> Option<String> {
    let (_, ext) = last_segment(url)?.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Local file name for a download link
pub fn file_name_for(url: &str) -> Option<String> {
    last_segment(url).map(sanitize_segment)
}

/// Returns true if the link's extension is in the allow-list
pub fn is_allowed(url: &str, allowed_extensions: &[String]) -> bool {
    extension_of(url)
        .map(|ext| allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false)
}
