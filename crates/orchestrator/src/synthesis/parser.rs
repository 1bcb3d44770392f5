//! Turning a free-form model reply into a [`Candidate`].

use codeloop_core::Candidate;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::ProviderError;

/// Pull the JSON object out of a reply that may wrap it in prose or fences.
pub fn extract_json_from_response(content: &str) -> String {
    if let Some(start) = content.find("```json") {
        let body = &content[start + 7..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
    }

    if let Some(start) = content.find("```\n{") {
        if let Some(end) = content[start + 4..].find("\n```") {
            return content[start + 4..start + 4 + end].trim().to_string();
        }
    }

    if let Some(start) = content.find('{') {
        if let Some(end) = content.rfind('}') {
            if end > start {
                return content[start..=end].to_string();
            }
        }
    }

    content.trim().to_string()
}

/// Remove a markdown fence a model put around source inside a JSON string.
pub fn strip_code_fence(source: &str) -> String {
    let trimmed = source.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return source.to_string();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return source.to_string();
    };
    // Drop the language tag on the opening line.
    match body.split_once('\n') {
        Some((_, code)) => code.trim_end().to_string() + "\n",
        None => body.trim().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct CandidatePayload {
    code: String,
    #[serde(default)]
    tests: String,
    #[serde(default)]
    explanation: String,
    #[serde(default, alias = "auxiliary_mappings", alias = "concept_mappings")]
    mappings: Option<BTreeMap<String, String>>,
}

pub fn parse_candidate(content: &str) -> Result<Candidate, ProviderError> {
    let json = extract_json_from_response(content);
    let payload: CandidatePayload = serde_json::from_str(&json)
        .map_err(|e| ProviderError::MalformedResponse(format!("{}: {}", e, preview(&json))))?;

    let mut candidate = Candidate::new(
        strip_code_fence(&payload.code),
        strip_code_fence(&payload.tests),
        payload.explanation,
    );
    if let Some(mappings) = payload.mappings.filter(|m| !m.is_empty()) {
        candidate = candidate.with_auxiliary_mappings(mappings);
    }

    candidate
        .validate()
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    Ok(candidate)
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(120).collect();
    if head.len() < text.len() {
        format!("{}...", head)
    } else {
        head
    }
}
