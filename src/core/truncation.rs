// src/core/truncation.rs — Content truncation
//
// Limits oversized search payloads and aged context entries.
// Cuts land on char boundaries; sizes are reported in chars.

/// Result of a truncation operation.
#[derive(Debug, Clone)]
pub struct TruncationResult {
    /// The (possibly truncated) content.
    pub content: String,
    /// Whether the content was truncated.
    pub was_truncated: bool,
    /// Original size in chars.
    pub original_chars: usize,
}

/// Truncate to `max_chars`, appending `... [truncated N chars]`.
pub fn truncate_with_note(content: &str, max_chars: usize) -> TruncationResult {
    cut(content, max_chars, |dropped, _| {
        format!("... [truncated {} chars]", dropped)
    })
}

/// Keep the first `keep_chars`, appending `... [compressed from N chars]`.
pub fn compress_with_note(content: &str, keep_chars: usize) -> TruncationResult {
    cut(content, keep_chars, |_, original| {
        format!("... [compressed from {} chars]", original)
    })
}

fn cut(
    content: &str,
    limit: usize,
    note: impl Fn(usize, usize) -> String,
) -> TruncationResult {
    let original_chars = content.chars().count();
    if original_chars <= limit {
        return TruncationResult {
            content: content.to_string(),
            was_truncated: false,
            original_chars,
        };
    }

    let byte_idx = content
        .char_indices()
        .nth(limit)
        .map(|(i, _)| i)
        .unwrap_or(content.len());

    TruncationResult {
        content: format!(
            "{}{}",
            &content[..byte_idx],
            note(original_chars - limit, original_chars)
        ),
        was_truncated: true,
        original_chars,
    }
}

/// Truncate for display/logging, without a note.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
