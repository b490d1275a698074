use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, AppResult};

static ZIP_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}$").expect("valid zip regex"));

/// Outcome of normalizing a flexible zip-code payload. Both sequences are
/// deduplicated preserving first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipNormalization {
    pub zip_codes: Vec<String>,
    pub invalid_zip_codes: Vec<String>,
}

/// Accepts the shapes client portals actually send: a JSON array of strings
/// or numbers, or a single comma/newline-delimited string. Anything else
/// normalizes to an empty result.
pub fn normalize_zip_input(input: &Value) -> ZipNormalization {
    let tokens: Vec<String> = match input {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(raw) => raw
            .split(|c| c == ',' || c == '\n')
            .map(|part| part.trim().to_string())
            .collect(),
        _ => Vec::new(),
    };

    let mut zip_codes = Vec::new();
    let mut invalid_zip_codes = Vec::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        if ZIP_PATTERN.is_match(&token) {
            if !zip_codes.contains(&token) {
                zip_codes.push(token);
            }
        } else if !invalid_zip_codes.contains(&token) {
            invalid_zip_codes.push(token);
        }
    }

    ZipNormalization {
        zip_codes,
        invalid_zip_codes,
    }
}

/// Caller-specific count policy. Any invalid code anywhere fails the whole
/// request, naming the offending values; no partial acceptance.
pub fn require_unique_range(
    normalized: &ZipNormalization,
    min: usize,
    max: usize,
) -> AppResult<Vec<String>> {
    if !normalized.invalid_zip_codes.is_empty() {
        return Err(AppError::Validation(format!(
            "invalid zip codes: {}",
            normalized.invalid_zip_codes.join(", ")
        )));
    }
    let count = normalized.zip_codes.len();
    if count < min {
        return Err(AppError::Validation(format!(
            "at least {min} unique zip codes required, got {count}"
        )));
    }
    if count > max {
        return Err(AppError::Validation(format!(
            "at most {max} unique zip codes allowed, got {count}"
        )));
    }
    Ok(normalized.zip_codes.clone())
}
