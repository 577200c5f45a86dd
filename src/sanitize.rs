//! Title to directory name mapping.

/// Characters rejected by either Windows or Unix file naming, plus a
/// conservative explicit set.
const EXPLICIT_INVALID: &[char] = &['"', '<', '>', '|', ':', '*', '?', '\\', '/'];

fn is_invalid_file_name_char(ch: char) -> bool {
    ch == '\0' || ch.is_ascii_control() || EXPLICIT_INVALID.contains(&ch)
}

/// Strips every character that is illegal in a file name and concatenates
/// what remains, with no separator inserted.
pub fn clean_title(title: &str) -> String {
    title
        .chars()
        .filter(|ch| !is_invalid_file_name_char(*ch))
        .collect()
}

/// The cleaned title when it can serve as a single directory name. Blank
/// results and dot-only names such as `.` or `..` are rejected.
pub fn title_dir_name(title: &str) -> Option<String> {
    let dir = clean_title(title);
    let trimmed = dir.trim();
    if trimmed.is_empty() || trimmed.chars().all(|ch| ch == '.') {
        return None;
    }
    Some(dir)
}
