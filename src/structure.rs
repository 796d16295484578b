use indicatif::ProgressBar;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::finetune::{ExampleFormatter, FormatError};
use crate::llm::{ChatModel, ChatRequest, LlmError, Message, Sampling};
use crate::report::RunStats;

const TEXT_PLACEHOLDER: &str = "{i}";
const SYSTEM_PROMPT: &str = "You are a helpful information extraction system.";

#[derive(Debug, Error)]
pub enum StructureError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("The API response is not a valid JSON object: {content}")]
    InvalidJson { content: String },

    #[error("Expected a JSON object, got: {content}")]
    NotAnObject { content: String },

    #[error("Input value is not text: {0}")]
    NotText(Value),
}

pub struct ExtractionJob {
    pub model: String,
    pub prompt_template: String,
    pub sampling: Sampling,
    pub json_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub key: String,
    pub error: String,
}

pub struct ExtractionOutput {
    /// `[{key: entity}, ..]` in input order
    pub records: Vec<Value>,
    pub failures: Vec<Failure>,
    pub stats: RunStats,
}

pub struct FinetuneOutput {
    pub examples: Vec<Value>,
    pub failures: Vec<Failure>,
    pub stats: RunStats,
}

pub fn render_prompt(template: &str, text: &str) -> String {
    if template.contains(TEXT_PLACEHOLDER) {
        template.replace(TEXT_PLACEHOLDER, text)
    } else {
        format!("{}\n\n{}", template, text)
    }
}

/// Drop a surrounding Markdown code fence (```` ```json ```` or bare ```` ``` ````).
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_entity(content: &str) -> Result<Map<String, Value>, StructureError> {
    let body = strip_code_fence(content);
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StructureError::NotAnObject { content: body.to_string() }),
        Err(_) => Err(StructureError::InvalidJson { content: body.to_string() }),
    }
}

pub async fn extract_entities(
    llm: &dyn ChatModel,
    job: &ExtractionJob,
    text: &str,
) -> Result<Map<String, Value>, StructureError> {
    let messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(render_prompt(&job.prompt_template, text)),
    ];
    let mut request = ChatRequest::new(&job.model, messages, job.sampling);
    if job.json_mode {
        request = request.json_object();
    }

    let content = llm.complete(request).await?;
    parse_entity(&content)
}

/// Extract one entity object per input entry. Failures are collected and the
/// loop moves on.
pub async fn extract_all(
    llm: &dyn ChatModel,
    job: &ExtractionJob,
    input: &Map<String, Value>,
    pb: &ProgressBar,
) -> ExtractionOutput {
    let mut records = Vec::with_capacity(input.len());
    let mut failures = Vec::new();
    let mut stats = RunStats::default();

    for (key, value) in input {
        let outcome = match value {
            Value::String(text) => extract_entities(llm, job, text).await,
            other => Err(StructureError::NotText(other.clone())),
        };
        stats.record(&outcome);

        match outcome {
            Ok(entity) => {
                let mut record = Map::new();
                record.insert(key.clone(), Value::Object(entity));
                records.push(Value::Object(record));
            }
            Err(e) => {
                warn!("Extraction failed for {}: {}", key, e);
                failures.push(Failure { key: key.clone(), error: e.to_string() });
            }
        }
        pb.inc(1);
    }

    info!("Extracted {} records ({} failed)", stats.ok, stats.errors);
    ExtractionOutput { records, failures, stats }
}

/// Format every record whose entity carries a `"text"` field. Records without
/// one are skipped and do not count toward the stats.
pub fn build_finetune(records: &[Value], formatter: &dyn ExampleFormatter, pb: &ProgressBar) -> FinetuneOutput {
    let mut examples = Vec::new();
    let mut failures = Vec::new();
    let mut stats = RunStats::default();

    for record in records {
        let Some(map) = record.as_object() else {
            pb.inc(1);
            continue;
        };
        for (key, entity) in map {
            if entity.get("text").is_none() {
                continue;
            }
            let outcome: Result<Value, FormatError> = formatter.format(entity);
            stats.record(&outcome);
            match outcome {
                Ok(example) => {
                    let mut out = Map::new();
                    out.insert(key.clone(), example);
                    examples.push(Value::Object(out));
                }
                Err(e) => {
                    warn!("Could not format {}: {}", key, e);
                    failures.push(Failure { key: key.clone(), error: e.to_string() });
                }
            }
        }
        pb.inc(1);
    }

    FinetuneOutput { examples, failures, stats }
}
