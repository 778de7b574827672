//! Text analysis shared by indexing and querying.
//!
//! Both sides go through the same tantivy analyzer so query tokens line up
//! with indexed terms.

use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};

/// Name the analyzer is registered under in every search index.
pub const ANALYZER: &str = "lexicon";

/// Splits on any non-alphanumeric character and lowercases, so "well-being"
/// yields `["well", "being"]`. Unicode letters and digits are kept.
pub fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .build()
}

/// Run `text` through the [`analyzer`].
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    tokens
}

/// Tokens joined by single spaces; what an exact primary-field match compares.
pub fn normalize(text: &str) -> String {
    tokenize(text).join(" ")
}
