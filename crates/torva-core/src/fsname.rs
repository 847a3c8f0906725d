//! Filename sanitisation and path-traversal guards shared by the packager,
//! the download handlers, and the retention sweeper.

use std::path::{Component, Path, PathBuf};

/// Characters never allowed in an archive or attachment filename.
const INVALID_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Longest sanitised name we will emit.
const MAX_NAME_LEN: usize = 200;

/// Sanitise a torrent name into a safe single-component filename.
///
/// Invalid path characters become `_`, surrounding whitespace and dots are
/// trimmed, the result is capped at 200 bytes on a character boundary, and an
/// empty result falls back to `download`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let mut result: String = name
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if result.len() > MAX_NAME_LEN {
        let mut cut = MAX_NAME_LEN;
        while !result.is_char_boundary(cut) {
            cut -= 1;
        }
        result.truncate(cut);
    }

    let trimmed = result.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Join an engine-supplied relative path under `base`, rejecting anything
/// that would escape it.
///
/// Absolute paths and `..` components are refused outright; the check is
/// lexical so it also covers paths that do not exist on disk yet.
#[must_use]
pub fn join_within(base: &Path, relative: &str) -> Option<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return None;
    }

    let mut joined = base.to_path_buf();
    let mut pushed = false;
    for component in candidate.components() {
        match component {
            Component::Normal(segment) => {
                joined.push(segment);
                pushed = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }

    pushed.then_some(joined)
}

/// Post-canonicalisation prefix check for paths that already exist on disk.
///
/// Both sides are canonicalised so an engine that smuggled a symlink or an
/// absolute path past the lexical guard is still rejected.
#[must_use]
pub fn is_within(base: &Path, candidate: &Path) -> bool {
    let (Ok(base), Ok(candidate)) = (base.canonicalize(), candidate.canonicalize()) else {
        return false;
    };
    candidate.starts_with(&base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize_file_name("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn sanitize_trims_dots_and_whitespace() {
        assert_eq!(sanitize_file_name("  ..name..  "), "name");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_file_name(""), "download");
        assert_eq!(sanitize_file_name(" . . "), "download");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_file_name(&long).len(), 200);
    }

    #[test]
    fn join_within_accepts_nested_relative_paths() {
        let base = Path::new("/srv/downloads");
        let joined = join_within(base, "show/season 1/e01.mkv").expect("joined");
        assert_eq!(joined, Path::new("/srv/downloads/show/season 1/e01.mkv"));
    }

    #[test]
    fn join_within_rejects_escapes() {
        let base = Path::new("/srv/downloads");
        assert!(join_within(base, "../etc/passwd").is_none());
        assert!(join_within(base, "/etc/passwd").is_none());
        assert!(join_within(base, "a/../../b").is_none());
        assert!(join_within(base, "").is_none());
    }

    #[test]
    fn is_within_requires_existing_prefix() {
        let dir = std::env::temp_dir();
        assert!(is_within(&dir, &dir));
        assert!(!is_within(&dir.join("does-not-exist"), &dir));
    }
}
