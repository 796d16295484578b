use anyhow::Result;
use indicatif::ProgressBar;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::llm::{ChatModel, ChatRequest, Message, Sampling};
use crate::report::RunStats;
use crate::store::Checkpoint;

const TEXT_PLACEHOLDER: &str = "{text}";

pub struct SummaryJob {
    pub model: String,
    pub messages: Vec<Message>,
    pub sampling: Sampling,
    pub batch_size: usize,
}

/// Flatten `{outer: {inner: text}}` into texts, outer-then-inner order.
pub fn flatten_descriptions(input: &Map<String, Value>) -> Vec<String> {
    input
        .values()
        .flat_map(|entry| match entry {
            Value::Object(inner) => inner.values().map(as_text).collect::<Vec<_>>(),
            other => vec![as_text(other)],
        })
        .collect()
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `text` into every `{text}` placeholder. With no placeholder
/// anywhere the text goes last as its own user message.
pub fn render_messages(template: &[Message], text: &str) -> Vec<Message> {
    let mut messages: Vec<Message> = template
        .iter()
        .map(|m| Message {
            role: m.role.clone(),
            content: m.content.replace(TEXT_PLACEHOLDER, text),
        })
        .collect();

    if !template.iter().any(|m| m.content.contains(TEXT_PLACEHOLDER)) {
        messages.push(Message::user(text));
    }
    messages
}

pub async fn summarize_one(llm: &dyn ChatModel, job: &SummaryJob, text: &str) -> crate::llm::Result<String> {
    let request = ChatRequest::new(&job.model, render_messages(&job.messages, text), job.sampling);
    llm.complete(request).await
}

/// Summarize `texts` in batches, appending to `checkpoint` and saving it after
/// every batch.
///
/// The first `checkpoint.len()` texts are taken as already done, so running
/// again with the same checkpoint continues where the last run stopped.
pub async fn summarize_all(
    llm: &dyn ChatModel,
    job: &SummaryJob,
    texts: &[String],
    checkpoint: &mut Checkpoint,
    pb: &ProgressBar,
) -> Result<RunStats> {
    let done = checkpoint.len();
    if done > texts.len() {
        warn!(
            "Checkpoint {} holds {} entries but input has only {} texts; nothing to do",
            checkpoint.path().display(),
            done,
            texts.len()
        );
    } else if done > 0 {
        info!("Resuming after {} completed items", done);
    }

    let remaining = texts.get(done..).unwrap_or_default();
    pb.inc(texts.len().min(done) as u64);

    let mut stats = RunStats::default();
    for batch in remaining.chunks(job.batch_size.max(1)) {
        for text in batch {
            let outcome = summarize_one(llm, job, text).await;
            stats.record(&outcome);
            match outcome {
                Ok(summary) => {
                    checkpoint.push_summary(summary);
                }
                Err(e) => {
                    let key = checkpoint.push_error(format!("Error summarizing description: {}", e));
                    warn!("{}: {}", key, e);
                }
            }
            pb.inc(1);
        }
        checkpoint.save()?;
    }

    Ok(stats)
}
