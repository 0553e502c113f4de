use std::str::FromStr;

use cryptodesk_models::analysis::Verdict;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::analyst::Analysis;
use crate::error::AgentError;

/// Extract the first JSON object from model output.
///
/// Accepts bare JSON, a fenced ```json block, or an object preceded by prose.
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = fenced_block(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = first_balanced_object(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

fn fenced_block(text: &str) -> Option<String> {
    for marker in ["```json", "```JSON", "```"] {
        let Some(start) = text.find(marker) else {
            continue;
        };
        let body_start = start + marker.len();
        if let Some(end) = text[body_start..].find("```") {
            return Some(text[body_start..body_start + end].trim().to_string());
        }
    }
    None
}

/// First balanced `{ ... }`, ignoring braces inside string literals.
fn first_balanced_object(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| text[s..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Deserialize)]
struct RawAnalysis {
    verdict: String,
    confidence: Value,
    #[serde(default, alias = "reasoning")]
    rationale: String,
}

/// Parse `{verdict, confidence, rationale}` out of raw CLI output.
///
/// Unknown verdicts and confidence outside [0, 1] are rejected, never clamped.
pub fn parse_analysis(raw: &str) -> Result<Analysis, AgentError> {
    let json_str = extract_json(raw)?;
    let parsed: RawAnalysis = serde_json::from_str(&json_str)
        .map_err(|e| AgentError::Parse(format!("Failed to parse analysis: {e}")))?;

    let verdict = Verdict::parse(&parsed.verdict)
        .ok_or_else(|| AgentError::Parse(format!("Unknown verdict: {}", parsed.verdict)))?;

    let confidence = match &parsed.confidence {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => n.as_f64().and_then(|f| Decimal::from_str(&f.to_string()).ok()),
        _ => None,
    }
    .ok_or_else(|| AgentError::Parse(format!("Invalid confidence: {}", parsed.confidence)))?;

    if confidence < Decimal::ZERO || confidence > Decimal::ONE {
        return Err(AgentError::Parse(format!(
            "Confidence {confidence} is outside [0, 1]"
        )));
    }

    Ok(Analysis {
        verdict,
        confidence,
        rationale: parsed.rationale,
    })
}
