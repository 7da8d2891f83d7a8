//! Output naming: sanitizing, extension normalization and collision avoidance.

use std::path::{Path, PathBuf};

const DEFAULT_EXTENSION: &str = "mp4";
const DEFAULT_NAME: &str = "output";

/// Strips a leading dot and lowercases. Empty means mp4.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        DEFAULT_EXTENSION.to_string()
    } else {
        ext
    }
}

/// Makes a user-supplied base name safe to use as a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            c if c.is_control() => '_',
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        DEFAULT_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `dir/base.ext`, or `dir/base(n).ext` for the first free n = 1, 2, ...
///
/// Does not create the file; a concurrent writer can still claim the name.
pub fn resolve_output_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let ext = normalize_extension(ext);
    let suffix = format!(".{ext}");
    let base = base
        .len()
        .checked_sub(suffix.len())
        .filter(|&cut| base.is_char_boundary(cut) && base[cut..].eq_ignore_ascii_case(&suffix))
        .map_or(base, |cut| &base[..cut]);

    let candidate = dir.join(format!("{base}.{ext}"));
    if !candidate.exists() {
        return candidate;
    }
    (1u64..)
        .map(|i| dir.join(format!("{base}({i}).{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
