//! Text matching helpers for search and context lookup
//!
//! SQLite's own `lower()` and `LIKE` fold ASCII only, so both sides of every
//! comparison go through [`fold_case`]: in Rust for the needle, and through
//! the `fold_case` SQL function for stored text.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// Escape character used in every `LIKE ... ESCAPE` clause
pub(crate) const LIKE_ESCAPE: char = '\\';

/// Name of the SQL function registered by [`register_case_folding`]
pub(crate) const FOLD_CASE_FN: &str = "fold_case";

/// Unicode lower-casing shared by queries and stored text
pub(crate) fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// Make `fold_case(text)` available to SQL on this connection
pub(crate) fn register_case_folding(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        FOLD_CASE_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| fold_case(&t)))
        },
    )
}

/// Build a case-folded `%substring%` pattern with LIKE wildcards escaped
pub(crate) fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in fold_case(query).chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Distinct lower-cased words of a prompt, in first-seen order.
///
/// Punctuation at word edges is stripped so "sunset," matches "sunset".
pub fn keywords(prompt: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for raw in prompt.split_whitespace() {
        let word = fold_case(raw.trim_matches(|c: char| !c.is_alphanumeric()));
        if !word.is_empty() && !words.contains(&word) {
            words.push(word);
        }
    }
    words
}
