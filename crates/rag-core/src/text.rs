//! Tokenization shared by indexing, querying and hashing embeddings.

/// Lowercase `text` and split it on non-alphanumeric boundaries.
///
/// Unicode-aware: kana and kanji runs are alphanumeric and stay together.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
