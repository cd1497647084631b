// src/core/decode.rs — Tolerant JSON decoding of model output
//
// Models wrap JSON in prose or markdown fences. Extraction strategies are
// tried in order; the first one that yields a value deserializing into the
// target type wins. When none do, `decode_or` returns the caller's terminal
// fallback value and logs why.

use serde::de::DeserializeOwned;

use crate::infra::errors::DelveError;

/// One way of locating a JSON document inside free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The whole (trimmed) text is JSON.
    Exact,
    /// Contents of the first ```json (or bare ```) fenced block.
    FencedBlock,
    /// From the first opening delimiter to the last matching closing one.
    DelimiterScan,
}

/// Strategies in the order they are attempted.
pub const STRATEGIES: [Strategy; 3] = [
    Strategy::Exact,
    Strategy::FencedBlock,
    Strategy::DelimiterScan,
];

impl Strategy {
    fn extract<'a>(&self, text: &'a str) -> Vec<&'a str> {
        match self {
            Self::Exact => vec![text.trim()],
            Self::FencedBlock => fenced_block(text).into_iter().collect(),
            Self::DelimiterScan => [('{', '}'), ('[', ']')]
                .iter()
                .filter_map(|(open, close)| delimited(text, *open, *close))
                .collect(),
        }
    }
}

/// A successfully decoded value and the strategy that found it.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub value: T,
    pub strategy: Strategy,
}

/// Decode `text` into `T` using each strategy in turn.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<Decoded<T>, DelveError> {
    for strategy in STRATEGIES {
        for candidate in strategy.extract(text) {
            if let Ok(value) = serde_json::from_str::<T>(candidate) {
                return Ok(Decoded { value, strategy });
            }
        }
    }
    Err(DelveError::Parse(format!(
        "no JSON document found in {} chars of output",
        text.len()
    )))
}

/// Like [`decode`], but never fails: when no strategy yields a `T`,
/// `fallback` is returned.
pub fn decode_or<T: DeserializeOwned>(text: &str, fallback: T) -> T {
    match decode(text) {
        Ok(decoded) => decoded.value,
        Err(e) => {
            tracing::warn!(strategies = STRATEGIES.len(), "Using fallback value: {}", e);
            fallback
        }
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let (start, fence_len) = match text.find("```json") {
        Some(i) => (i, "```json".len()),
        None => (text.find("```")?, "```".len()),
    };
    let body = &text[start + fence_len..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn delimited(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
