use std::sync::LazyLock;

use regex::Regex;

static SEPARATOR_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("separator pattern is valid"));

/// Maps a raw CSV header to a snake_case identifier made of `[a-z0-9_]`.
///
/// Every run of characters other than ASCII letters and digits (whitespace,
/// punctuation, non-ASCII, existing underscores) collapses into a single `_`
/// and underscores at either end are dropped. The result is empty only when
/// the input has no ASCII alphanumerics at all. Applying it twice gives the
/// same result as applying it once.
pub fn normalize_column_name(raw: &str) -> String {
    let lowered = raw.to_ascii_lowercase();
    SEPARATOR_RUN
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Normalizes a whole header row. Columns that normalize to nothing are named
/// `unnamed_<index>`.
pub fn normalize_headers<'a, I>(headers: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    headers
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let name = normalize_column_name(raw);
            if name.is_empty() {
                format!("unnamed_{index}")
            } else {
                name
            }
        })
        .collect()
}
