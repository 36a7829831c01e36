//! Filename sanitization for delivered artifacts.

pub const MAX_FILENAME_CHARS: usize = 80;
pub const TRUNCATED_STEM_CHARS: usize = 70;
pub const ELLIPSIS: &str = "...";
pub const FALLBACK_FILENAME: &str = "video";

/// Strips filesystem-hostile and non-word characters and shortens long names
/// while keeping the extension. Never returns an empty string.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !is_hostile(*c))
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '-' | '.'))
        .collect();
    let cleaned = cleaned.trim();

    // A title made only of symbols leaves a bare extension like `.mp4`.
    let visible = cleaned.trim_start_matches(|c: char| c == '.' || c.is_whitespace());
    let cleaned = if visible.len() < cleaned.len() && !visible.is_empty() && !visible.contains('.')
    {
        format!("{FALLBACK_FILENAME}.{visible}")
    } else {
        visible.to_string()
    };

    let result = if cleaned.chars().count() > MAX_FILENAME_CHARS {
        let (stem, extension) = split_extension(&cleaned);
        let prefix: String = stem.chars().take(TRUNCATED_STEM_CHARS).collect();
        format!("{prefix}{ELLIPSIS}{extension}")
    } else {
        cleaned
    };

    if result.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        result
    }
}

fn is_hostile(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || (c as u32) < 0x20
}

/// Splits `name` into stem and extension (including the dot). Leading dots
/// never start an extension, so `.bashrc` has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(index) => name.split_at(leading + index),
        None => (name, ""),
    }
}
