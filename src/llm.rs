//! LLM provider clients and prompt composition.
//!
//! Two chat-completion providers are supported, selected per request or by
//! `default_llm_provider`: OpenAI-compatible (optionally routed through
//! `llm_service_url`) and Anthropic. Both follow the same retry discipline
//! as the embedding providers: 429/5xx/network retry with exponential
//! backoff, other 4xx fail immediately. A provider without credentials is
//! reported distinctly so the gateway can surface 503.
//!
//! Prompt builders for the analysis, question, and comparison endpoints
//! live here so the gateway handlers stay thin.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{LlmConfig, ServicesConfig};
use crate::models::Document;
use crate::vector::SearchResultChunk;

pub const PROVIDER_OPENAI: &str = "openai";
pub const PROVIDER_ANTHROPIC: &str = "anthropic";

/// Marker in errors meaning "no credential for this provider"; mapped to
/// 503 at the gateway.
pub const ERR_NO_CREDENTIALS: &str = "provider has no API credentials";

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub tokens_used: Option<u64>,
}

/// The eight supported analysis types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Summary,
    LiteratureReview,
    KeyFindings,
    Methodology,
    ResultsAnalysis,
    Limitations,
    FutureWork,
    Custom,
}

impl AnalysisType {
    pub fn parse(s: &str) -> Option<AnalysisType> {
        match s {
            "summary" => Some(AnalysisType::Summary),
            "literature_review" => Some(AnalysisType::LiteratureReview),
            "key_findings" => Some(AnalysisType::KeyFindings),
            "methodology" => Some(AnalysisType::Methodology),
            "results_analysis" => Some(AnalysisType::ResultsAnalysis),
            "limitations" => Some(AnalysisType::Limitations),
            "future_work" => Some(AnalysisType::FutureWork),
            "custom" => Some(AnalysisType::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Summary => "summary",
            AnalysisType::LiteratureReview => "literature_review",
            AnalysisType::KeyFindings => "key_findings",
            AnalysisType::Methodology => "methodology",
            AnalysisType::ResultsAnalysis => "results_analysis",
            AnalysisType::Limitations => "limitations",
            AnalysisType::FutureWork => "future_work",
            AnalysisType::Custom => "custom",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            AnalysisType::Summary => {
                "Write a concise summary of the paper: problem, approach, and main results."
            }
            AnalysisType::LiteratureReview => {
                "Situate this paper in its research area: what prior work it builds on and how it differs."
            }
            AnalysisType::KeyFindings => {
                "List the paper's key findings as bullet points with supporting evidence."
            }
            AnalysisType::Methodology => {
                "Describe the methodology in detail: design, datasets, procedures, and controls."
            }
            AnalysisType::ResultsAnalysis => {
                "Analyze the reported results: effect sizes, significance, and robustness."
            }
            AnalysisType::Limitations => {
                "Identify the limitations of this work, both acknowledged and unacknowledged."
            }
            AnalysisType::FutureWork => {
                "Propose follow-up research directions that this paper opens up."
            }
            AnalysisType::Custom => "",
        }
    }
}

// ============ Completion dispatch ============

/// Which providers currently have credentials; reported by gateway health.
pub fn providers_with_credentials(config: &LlmConfig) -> Vec<&'static str> {
    let mut providers = Vec::new();
    if config.openai_key().is_some() {
        providers.push(PROVIDER_OPENAI);
    }
    if config.anthropic_key().is_some() {
        providers.push(PROVIDER_ANTHROPIC);
    }
    providers
}

pub async fn complete(
    config: &LlmConfig,
    services: &ServicesConfig,
    provider: Option<&str>,
    model: Option<&str>,
    messages: &[ChatMessage],
    max_tokens: Option<u32>,
    temperature: Option<f64>,
) -> Result<Completion> {
    let provider = provider.unwrap_or(&config.default_llm_provider);
    let max_tokens = max_tokens.unwrap_or(config.max_tokens);
    let temperature = temperature.unwrap_or(config.temperature);

    match provider {
        PROVIDER_OPENAI => {
            complete_openai(config, services, model, messages, max_tokens, temperature).await
        }
        PROVIDER_ANTHROPIC => {
            complete_anthropic(config, model, messages, max_tokens, temperature).await
        }
        other => bail!("unknown LLM provider: {other}. Use openai or anthropic."),
    }
}

async fn post_with_retry(
    config: &LlmConfig,
    build: impl Fn() -> reqwest::RequestBuilder,
    provider: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("{provider} API error {status}: {body}"));
                    continue;
                }
                let body = response.text().await.unwrap_or_default();
                bail!("{provider} API error {status}: {body}");
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{provider} completion failed after retries")))
}

async fn complete_openai(
    config: &LlmConfig,
    services: &ServicesConfig,
    model: Option<&str>,
    messages: &[ChatMessage],
    max_tokens: u32,
    temperature: f64,
) -> Result<Completion> {
    let Some(api_key) = config.openai_key() else {
        bail!("openai {ERR_NO_CREDENTIALS}");
    };
    let model = model
        .map(str::to_string)
        .or_else(|| config.default_model.clone())
        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
    let base = services
        .llm_service_url
        .as_deref()
        .unwrap_or("https://api.openai.com")
        .trim_end_matches('/')
        .to_string();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "temperature": temperature,
    });

    let json = post_with_retry(
        config,
        || {
            client
                .post(format!("{base}/v1/chat/completions"))
                .header("Authorization", format!("Bearer {api_key}"))
                .json(&body)
        },
        PROVIDER_OPENAI,
    )
    .await?;

    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing content"))?
        .to_string();
    let tokens_used = json.pointer("/usage/total_tokens").and_then(|t| t.as_u64());

    Ok(Completion {
        content,
        model,
        provider: PROVIDER_OPENAI.to_string(),
        tokens_used,
    })
}

async fn complete_anthropic(
    config: &LlmConfig,
    model: Option<&str>,
    messages: &[ChatMessage],
    max_tokens: u32,
    temperature: f64,
) -> Result<Completion> {
    let Some(api_key) = config.anthropic_key() else {
        bail!("anthropic {ERR_NO_CREDENTIALS}");
    };
    let model = model
        .map(str::to_string)
        .or_else(|| config.default_model.clone())
        .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string());

    // Anthropic takes the system prompt out of band.
    let system: String = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != "system").collect();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut body = serde_json::json!({
        "model": model,
        "messages": turns,
        "max_tokens": max_tokens,
        "temperature": temperature,
    });
    if !system.is_empty() {
        body["system"] = serde_json::json!(system);
    }

    let json = post_with_retry(
        config,
        || {
            client
                .post("https://api.anthropic.com/v1/messages")
                .header("x-api-key", api_key.clone())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
        },
        PROVIDER_ANTHROPIC,
    )
    .await?;

    let content = json
        .pointer("/content/0/text")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("invalid Anthropic response: missing content"))?
        .to_string();
    let tokens_used = match (
        json.pointer("/usage/input_tokens").and_then(|t| t.as_u64()),
        json.pointer("/usage/output_tokens").and_then(|t| t.as_u64()),
    ) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    };

    Ok(Completion {
        content,
        model,
        provider: PROVIDER_ANTHROPIC.to_string(),
        tokens_used,
    })
}

// ============ Prompt builders ============

fn render_context(chunks: &[SearchResultChunk]) -> String {
    chunks
        .iter()
        .map(|c| {
            format!(
                "[doc {} / {}] {}",
                c.document_id,
                c.section.as_deref().unwrap_or("body"),
                c.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn document_summary_block(doc: &Document) -> String {
    let mut block = String::new();
    if let Some(title) = &doc.title {
        block.push_str(&format!("Title: {title}\n"));
    }
    if !doc.authors.is_empty() {
        block.push_str(&format!("Authors: {}\n", doc.authors.join(", ")));
    }
    if let Some(abstract_text) = &doc.abstract_text {
        block.push_str(&format!("Abstract: {abstract_text}\n"));
    }
    block
}

pub fn build_analysis_messages(
    doc: &Document,
    analysis_type: AnalysisType,
    custom_prompt: Option<&str>,
    context: &[SearchResultChunk],
) -> Result<Vec<ChatMessage>> {
    let instruction = match analysis_type {
        AnalysisType::Custom => custom_prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("custom analysis requires custom_prompt"))?
            .to_string(),
        other => other.instruction().to_string(),
    };

    let mut user = format!("{}\n\n{}", instruction, document_summary_block(doc));
    if !context.is_empty() {
        user.push_str("\nRelevant passages:\n");
        user.push_str(&render_context(context));
    }

    Ok(vec![
        ChatMessage::system(
            "You are a research assistant analyzing academic papers. Ground every claim in the provided text.",
        ),
        ChatMessage::user(user),
    ])
}

pub fn build_question_messages(
    question: &str,
    context: &[SearchResultChunk],
) -> Vec<ChatMessage> {
    let mut user = String::new();
    if !context.is_empty() {
        user.push_str("Context from the user's document library:\n");
        user.push_str(&render_context(context));
        user.push_str("\n\n");
    }
    user.push_str(&format!("Question: {question}"));

    vec![
        ChatMessage::system(
            "You answer questions about research papers. Cite the provided context; say so when it is insufficient.",
        ),
        ChatMessage::user(user),
    ]
}

pub fn build_compare_messages(
    docs: &[Document],
    aspects: &[String],
    context: &[SearchResultChunk],
) -> Vec<ChatMessage> {
    let mut user = String::from("Compare the following papers");
    if !aspects.is_empty() {
        user.push_str(&format!(" along these aspects: {}", aspects.join(", ")));
    }
    user.push_str(".\n\n");
    for (n, doc) in docs.iter().enumerate() {
        user.push_str(&format!("Paper {}:\n{}\n", n + 1, document_summary_block(doc)));
    }
    if !context.is_empty() {
        user.push_str("\nRelevant passages:\n");
        user.push_str(&render_context(context));
    }

    vec![
        ChatMessage::system(
            "You compare academic papers, contrasting their approaches and findings aspect by aspect.",
        ),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: i64, title: &str) -> Document {
        Document {
            id,
            filename: "p.pdf".to_string(),
            file_path: "/tmp/p.pdf".to_string(),
            owner_id: "u1".to_string(),
            doi: None,
            title: Some(title.to_string()),
            authors: vec!["A. Author".to_string()],
            abstract_text: Some("An abstract.".to_string()),
            sections: serde_json::json!({}),
            tables: serde_json::json!([]),
            figures: serde_json::json!([]),
            references: serde_json::json!([]),
            ocr_applied: false,
            page_count: 3,
            batch_id: None,
            uploaded_at: 0,
        }
    }

    #[test]
    fn analysis_type_parsing_covers_enumerated_values() {
        for name in [
            "summary",
            "literature_review",
            "key_findings",
            "methodology",
            "results_analysis",
            "limitations",
            "future_work",
            "custom",
        ] {
            assert_eq!(AnalysisType::parse(name).unwrap().as_str(), name);
        }
        assert!(AnalysisType::parse("sentiment").is_none());
    }

    #[test]
    fn custom_analysis_requires_prompt() {
        let d = doc(1, "Paper");
        assert!(build_analysis_messages(&d, AnalysisType::Custom, None, &[]).is_err());
        assert!(build_analysis_messages(&d, AnalysisType::Custom, Some("  "), &[]).is_err());
        let msgs =
            build_analysis_messages(&d, AnalysisType::Custom, Some("Count the equations."), &[])
                .unwrap();
        assert!(msgs[1].content.contains("Count the equations."));
    }

    #[test]
    fn analysis_messages_carry_document_metadata() {
        let d = doc(1, "Chunk Retrieval");
        let msgs = build_analysis_messages(&d, AnalysisType::Summary, None, &[]).unwrap();
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[1].content.contains("Chunk Retrieval"));
        assert!(msgs[1].content.contains("A. Author"));
    }

    #[test]
    fn question_messages_include_context() {
        let chunk = SearchResultChunk {
            chunk_id: "c1".to_string(),
            document_id: 4,
            document_title: Some("T".to_string()),
            section: Some("results".to_string()),
            text: "Latency fell by half.".to_string(),
            similarity_score: 0.9,
            page: None,
        };
        let msgs = build_question_messages("What happened to latency?", &[chunk]);
        assert!(msgs[1].content.contains("Latency fell by half."));
        assert!(msgs[1].content.contains("What happened to latency?"));
    }

    #[test]
    fn compare_messages_enumerate_papers() {
        let msgs = build_compare_messages(
            &[doc(1, "First"), doc(2, "Second")],
            &["methodology".to_string()],
            &[],
        );
        assert!(msgs[1].content.contains("Paper 1:"));
        assert!(msgs[1].content.contains("Paper 2:"));
        assert!(msgs[1].content.contains("methodology"));
    }

    #[test]
    fn credential_report_reflects_config() {
        let empty = LlmConfig::default();
        // Only true when the environment provides no keys.
        if std::env::var("OPENAI_API_KEY").is_err() && std::env::var("ANTHROPIC_API_KEY").is_err() {
            assert!(providers_with_credentials(&empty).is_empty());
        }
        let with_keys = LlmConfig {
            openai_api_key: Some("sk-test".to_string()),
            anthropic_api_key: Some("ak-test".to_string()),
            ..LlmConfig::default()
        };
        let providers = providers_with_credentials(&with_keys);
        assert!(providers.contains(&PROVIDER_OPENAI));
        assert!(providers.contains(&PROVIDER_ANTHROPIC));
    }
}
