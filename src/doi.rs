//! DOI extraction and directory validation.
//!
//! DOIs are pulled from document text with a lightweight scanner for the
//! `10.NNNN/suffix` shape. Validation asks the configured external
//! directory (Crossref-compatible: `GET {base}/{doi}`) for the record;
//! failures are non-fatal — ingestion proceeds with the unvalidated DOI.

use anyhow::Result;
use serde::Serialize;
use std::time::Duration;

use crate::config::IngestConfig;

/// Outcome of a directory lookup.
#[derive(Debug, Clone, Serialize)]
pub struct DoiValidation {
    pub doi: String,
    pub valid: bool,
    pub title: Option<String>,
    pub publisher: Option<String>,
}

/// Find the first DOI in `text`. DOIs start with a `10.` registrant prefix
/// of 4+ digits, then a slash, then a non-whitespace suffix.
pub fn extract_doi(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(pos) = text[search_from..].find("10.") {
        let start = search_from + pos;
        search_from = start + 3;

        let after_prefix = &text[start + 3..];
        let digits = after_prefix
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .count();
        if !(4..=9).contains(&digits) {
            continue;
        }
        if after_prefix.as_bytes().get(digits) != Some(&b'/') {
            continue;
        }

        let suffix_start = start + 3 + digits + 1;
        let suffix_len = text[suffix_start..]
            .chars()
            .take_while(|c| !c.is_whitespace())
            .map(|c| c.len_utf8())
            .sum::<usize>();
        if suffix_len == 0 {
            continue;
        }

        // DOIs are preceded by a boundary, not embedded in a longer token.
        if start > 0 {
            let prev = bytes[start - 1] as char;
            if prev.is_ascii_alphanumeric() {
                continue;
            }
        }

        let candidate = &text[start..suffix_start + suffix_len];
        let cleaned = candidate.trim_end_matches(['.', ',', ';', ')', ']', '"', '\'']);
        return Some(cleaned.to_string());
    }

    None
}

/// Ask the external directory whether `doi` resolves. Network or directory
/// errors surface as `Err`; callers treat them as non-fatal.
pub async fn validate_doi(config: &IngestConfig, doi: &str) -> Result<DoiValidation> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let url = format!(
        "{}/{}",
        config.doi_directory_url.trim_end_matches('/'),
        doi
    );

    let response = client.get(&url).send().await?;
    if response.status().as_u16() == 404 {
        return Ok(DoiValidation {
            doi: doi.to_string(),
            valid: false,
            title: None,
            publisher: None,
        });
    }
    if !response.status().is_success() {
        anyhow::bail!("DOI directory error: {}", response.status());
    }

    let json: serde_json::Value = response.json().await?;
    let message = json.get("message").unwrap_or(&serde_json::Value::Null);

    Ok(DoiValidation {
        doi: doi.to_string(),
        valid: true,
        title: message
            .get("title")
            .and_then(|t| t.as_array())
            .and_then(|a| a.first())
            .and_then(|t| t.as_str())
            .map(|t| t.to_string()),
        publisher: message
            .get("publisher")
            .and_then(|p| p.as_str())
            .map(|p| p.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_plain_doi() {
        let text = "As reported in doi:10.1038/nature12373 the results hold.";
        assert_eq!(extract_doi(text), Some("10.1038/nature12373".to_string()));
    }

    #[test]
    fn strips_trailing_punctuation() {
        let text = "See https://doi.org/10.1145/3292500.3330701, which describes it.";
        assert_eq!(
            extract_doi(text),
            Some("10.1145/3292500.3330701".to_string())
        );
    }

    #[test]
    fn rejects_short_registrant() {
        assert_eq!(extract_doi("version 10.2/patch notes"), None);
        assert_eq!(extract_doi("pi is about 3.1415"), None);
    }

    #[test]
    fn rejects_embedded_match() {
        assert_eq!(extract_doi("build-id x10.1234/abc"), None);
    }

    #[test]
    fn no_doi_in_plain_text() {
        assert_eq!(extract_doi("No identifiers in this sentence."), None);
    }

    #[test]
    fn requires_suffix() {
        assert_eq!(extract_doi("dangling 10.1234/ prefix"), None);
    }
}
