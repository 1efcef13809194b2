//! Reply parsing for model outputs.
//!
//! Models wrap answers in markdown fences (```sql, ```json) or add a sentence
//! around them. These helpers recover the payload.

use serde::de::DeserializeOwned;

/// Removes a surrounding markdown code fence, with or without a language tag.
///
/// Text without a fence is returned trimmed. If the reply contains several
/// fenced blocks, the first is used.
pub fn strip_code_fences(reply: &str) -> String {
    let trimmed = reply.trim();

    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let after_fence = &trimmed[start + 3..];
    // Skip the language tag up to the end of the opening line
    let body_start = match after_fence.find('\n') {
        Some(newline) => newline + 1,
        None => return trimmed.to_string(),
    };
    let body = &after_fence[body_start..];

    match body.find("```") {
        Some(end) => body[..end].trim().to_string(),
        None => body.trim().to_string(),
    }
}

/// Extracts a single SQL statement from a reply: fences and one trailing
/// semicolon are removed.
pub fn extract_sql(reply: &str) -> String {
    let sql = strip_code_fences(reply);
    sql.trim().trim_end_matches(';').trim_end().to_string()
}

/// Parses a JSON value out of a reply.
///
/// Accepts a bare JSON document, a fenced one, or one embedded in prose
/// (the outermost `{...}` or `[...]` span is tried).
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, String> {
    let body = strip_code_fences(reply);

    let first_error = match serde_json::from_str::<T>(&body) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<T>(&body[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    Err(first_error)
}
