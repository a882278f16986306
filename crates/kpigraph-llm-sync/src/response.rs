//! Turning raw generated text into a claim set.
//!
//! Models wrap their JSON in reasoning blocks, markdown fences, echoed
//! prompts and prose, and run out of tokens mid-array. Cleaning happens in
//! this order:
//!
//! 1. drop an echoed prompt,
//! 2. keep only what follows the last `</think>`,
//! 3. unwrap a markdown code fence and a bare `json` prefix,
//! 4. cut out the first balanced JSON object (brace balancing ignores
//!    braces inside strings),
//! 5. if the object never closes, close the open brackets.

use crate::error::ResponseError;
use kpigraph_core::{ClaimSet, KpiClaim};
use serde_json::Value;

const THINK_END: &str = "</think>";

/// Clean raw generated text down to (hopefully) one JSON object.
pub fn clean_response(raw: &str, echoed_prompt: Option<&str>) -> String {
    let mut text = raw;
    let without_prompt;
    if let Some(prompt) = echoed_prompt.filter(|p| !p.is_empty()) {
        if let Some(pos) = text.find(prompt) {
            without_prompt = format!("{}{}", &text[..pos], &text[pos + prompt.len()..]);
            text = &without_prompt;
        }
    }

    if let Some(pos) = text.rfind(THINK_END) {
        text = &text[pos + THINK_END.len()..];
    }

    let text = unfence(text.trim());
    let text = text
        .strip_prefix("json")
        .map(str::trim_start)
        .unwrap_or(text);

    let Some(start) = text.find('{') else {
        return text.trim().to_string();
    };
    match balanced_object_end(text, start) {
        Some(end) => text[start..=end].to_string(),
        None => repair_truncated_json(&text[start..]),
    }
}

fn unfence(text: &str) -> &str {
    if let Some(pos) = text.find("```json") {
        let body = &text[pos + "```json".len()..];
        return body.split("```").next().unwrap_or(body).trim();
    }
    let mut parts = text.split("```");
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(body), Some(_)) => body.trim(),
        _ => text,
    }
}

/// Byte index of the `}` closing the object opened at `start`.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + idx);
                }
            }
            _ => {}
        }
    }
    None
}

struct Scan {
    open: Vec<char>,
    in_string: bool,
}

fn scan(text: &str) -> Scan {
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for ch in text.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => open.push(ch),
            '}' | ']' => {
                open.pop();
            }
            _ => {}
        }
    }
    Scan { open, in_string }
}

/// Close a JSON document cut off by an output-token limit.
///
/// An unterminated last line (open string, dangling key) is dropped; open
/// arrays and objects are then closed innermost first. Complete documents
/// are returned unchanged.
pub fn repair_truncated_json(text: &str) -> String {
    let mut text = text.trim_end().to_string();
    if text.is_empty() {
        return text;
    }

    let mut state = scan(&text);
    let dangling = text.ends_with(':');
    if state.in_string || dangling {
        match text.rfind('\n') {
            Some(pos) => text.truncate(pos),
            None => return text,
        }
        state = scan(&text);
    }
    if state.open.is_empty() {
        return text;
    }

    let mut repaired = text.trim_end().trim_end_matches(',').to_string();
    tracing::debug!(closing = state.open.len(), "repairing truncated JSON");
    for open in state.open.iter().rev() {
        repaired.push(if *open == '{' { '}' } else { ']' });
    }
    repaired
}

/// Parse cleaned text into a claim set.
///
/// Accepts `{"kpis": [...]}` and, leniently, a bare array of claims.
pub fn parse_claim_set(cleaned: &str) -> Result<ClaimSet, ResponseError> {
    let cleaned = cleaned.trim();
    if !cleaned.starts_with('{') && !cleaned.starts_with('[') {
        return Err(ResponseError::NoJson);
    }
    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| ResponseError::InvalidJson(e.to_string()))?;
    let kpis = match value {
        Value::Object(mut map) => match map.remove("kpis") {
            Some(kpis @ Value::Array(_)) => kpis,
            _ => return Err(ResponseError::MissingKpis),
        },
        array @ Value::Array(_) => array,
        _ => return Err(ResponseError::MissingKpis),
    };
    let kpis: Vec<KpiClaim> =
        serde_json::from_value(kpis).map_err(|e| ResponseError::InvalidJson(e.to_string()))?;
    Ok(ClaimSet::new(kpis))
}

/// `clean_response` followed by `parse_claim_set`.
pub fn decode_claims(raw: &str, echoed_prompt: Option<&str>) -> Result<ClaimSet, ResponseError> {
    parse_claim_set(&clean_response(raw, echoed_prompt))
}

pub fn truncate_preview(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}…")
}
