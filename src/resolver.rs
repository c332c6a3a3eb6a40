//! Response parsing and repair: extracting a JSON payload from an LLM's raw
//! text response, tolerating the minor malformations models routinely
//! produce (fenced code blocks, trailing commas, an unbalanced closing
//! bracket), and validating the chunk-transform alignment invariant.

use crate::data::{Chunk, TransformedChunk};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no JSON payload found in response")]
    NoJsonFound,
    #[error("json parse failed even after repair: {0}")]
    Unparseable(#[from] serde_json::Error),
}

/// Strip a ```json ... ``` or ``` ... ``` fence if present, else return the
/// input trimmed.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    trimmed
}

/// Find the first top-level JSON value (object or array) in `text` by
/// matching brackets, in case the model prefaced its answer with prose.
fn extract_bracketed(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find(['{', '['])?;
    let open = bytes[start] as char;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (offset, ch) in text[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove trailing commas before a closing bracket/brace, the most common
/// malformation in otherwise-valid model JSON output.
fn repair_trailing_commas(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let chars: Vec<char> = json.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Parse a JSON value of type `T` out of a raw LLM response, tolerating code
/// fences and trailing commas.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ResolveError> {
    let unfenced = strip_fence(raw);
    let candidate = extract_bracketed(unfenced).unwrap_or(unfenced);

    if let Ok(value) = serde_json::from_str(candidate) {
        return Ok(value);
    }

    let repaired = repair_trailing_commas(candidate);
    serde_json::from_str(&repaired).map_err(ResolveError::from)
}

/// Convenience wrapper for the character-analysis extraction response, which
/// is always a JSON array.
pub fn parse_json_array<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, ResolveError> {
    parse_json(raw)
}

/// The expected wire shape of a chunk-transform response: a JSON object
/// mapping the (stringified) sentence index to its transformed text.
#[derive(Debug, serde::Deserialize)]
#[serde(transparent)]
struct SentenceMapResponse(HashMap<String, String>);

/// Parse a transform response and validate it against the chunk's alignment
/// invariant (spec.md §8 invariant 1: output key set == input index set).
pub fn parse_transform_response(raw: &str, chunk: &Chunk) -> Result<TransformedChunk, ResolveError> {
    let parsed: SentenceMapResponse = parse_json(raw)?;
    let sentences: HashMap<usize, String> = parsed
        .0
        .into_iter()
        .filter_map(|(key, value)| key.parse::<usize>().ok().map(|index| (index, value)))
        .collect();

    Ok(TransformedChunk {
        chunk_id: chunk.id,
        sentences,
        was_fallback: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Chunk;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"1\": \"hi\"}\n```";
        let parsed: HashMap<String, String> = parse_json(raw).unwrap();
        assert_eq!(parsed.get("1"), Some(&"hi".to_string()));
    }

    #[test]
    fn repairs_trailing_comma() {
        let raw = "{\"1\": \"hi\", \"2\": \"bye\",}";
        let parsed: HashMap<String, String> = parse_json(raw).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn extracts_json_preceded_by_prose() {
        let raw = "Here is the result:\n[{\"name\": \"Alice\"}]\nLet me know if you need more.";
        #[derive(serde::Deserialize)]
        struct Entry {
            name: String,
        }
        let parsed: Vec<Entry> = parse_json_array(raw).unwrap();
        assert_eq!(parsed[0].name, "Alice");
    }

    fn sample_chunk() -> Chunk {
        Chunk {
            id: uuid::Uuid::new_v4(),
            chapter_index: 0,
            paragraph_range: 0..1,
            sentences: vec![(1, "Hello.".to_string()), (2, "World.".to_string())],
            estimated_tokens: 10,
        }
    }

    #[test]
    fn alignment_ok_when_keys_match() {
        let chunk = sample_chunk();
        let raw = "{\"1\": \"Hi.\", \"2\": \"Earth.\"}";
        let transformed = parse_transform_response(raw, &chunk).unwrap();
        assert!(transformed.alignment_ok(&chunk));
    }

    #[test]
    fn alignment_fails_when_a_key_is_missing() {
        let chunk = sample_chunk();
        let raw = "{\"1\": \"Hi.\"}";
        let transformed = parse_transform_response(raw, &chunk).unwrap();
        assert!(!transformed.alignment_ok(&chunk));
    }
}
