//! Stage configuration.
//!
//! Each stage reads one JSON file from the config directory. Any field can be
//! overridden with an `ADDITIVES_<FIELD>` environment variable, e.g.
//! `ADDITIVES_BATCH_SIZE=25`.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::llm::{Message, Sampling};

const ENV_PREFIX: &str = "ADDITIVES";

pub const SCRAPE_CONFIG: &str = "config_scrape.json";
pub const SUMMARIZE_CONFIG: &str = "config_summ.json";
pub const STRUCTURE_CONFIG: &str = "config_structure.json";
pub const BASE_PROMPT: &str = "base_prompt.json";

/// Load `<config_dir>/.env` into the process environment if it exists.
pub fn load_env(config_dir: &Path) -> Result<()> {
    let path = config_dir.join(".env");
    match dotenvy::from_path(&path) {
        Ok(()) => {
            info!("Loaded environment from {}", path.display());
            Ok(())
        }
        Err(e) if e.not_found() => {
            debug!("No .env at {}, using process environment", path.display());
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let settings = Config::builder()
        .add_source(File::from(path).format(FileFormat::Json).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX))
        .build()
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    settings
        .try_deserialize()
        .with_context(|| format!("Invalid config {}", path.display()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeSettings {
    /// URL list, relative to the data directory unless absolute.
    #[serde(default = "default_urls_file")]
    pub urls_file: PathBuf,

    /// CSS selector of the element whose direct `<p>` children hold the text.
    #[serde(default = "default_container_selector")]
    pub container_selector: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ScrapeSettings {
    pub fn load(config_dir: &Path) -> Result<Self> {
        load(&config_dir.join(SCRAPE_CONFIG))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeSettings {
    #[serde(default = "default_model")]
    pub openai_model: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_penalty")]
    pub frequency_penalty: f32,

    #[serde(default = "default_penalty")]
    pub presence_penalty: f32,

    /// Instruction messages; `{text}` marks where the description goes.
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
}

impl SummarizeSettings {
    pub fn load(config_dir: &Path) -> Result<Self> {
        let settings: Self = load(&config_dir.join(SUMMARIZE_CONFIG))?;
        ensure!(settings.batch_size > 0, "batch_size must be at least 1");
        validate_sampling(&settings.sampling())?;
        Ok(settings)
    }

    pub fn sampling(&self) -> Sampling {
        Sampling {
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.clone().unwrap_or_else(default_summary_messages)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructureSettings {
    #[serde(default = "default_model")]
    pub openai_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_penalty")]
    pub frequency_penalty: f32,

    #[serde(default = "default_penalty")]
    pub presence_penalty: f32,

    /// Request `response_format: json_object` from the API.
    #[serde(default)]
    pub json_mode: bool,
}

impl StructureSettings {
    pub fn load(config_dir: &Path) -> Result<Self> {
        let settings: Self = load(&config_dir.join(STRUCTURE_CONFIG))?;
        validate_sampling(&settings.sampling())?;
        Ok(settings)
    }

    pub fn sampling(&self) -> Sampling {
        Sampling {
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasePrompt {
    /// Prompt template; `{i}` is replaced by the text to analyse.
    pub base_prompt: String,
}

impl BasePrompt {
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(BASE_PROMPT);
        ensure!(path.exists(), "{} does not exist", path.display());
        crate::store::read_json(&path)
    }
}

fn validate_sampling(s: &Sampling) -> Result<()> {
    ensure!((0.0..=2.0).contains(&s.temperature), "temperature must be within [0, 2], got {}", s.temperature);
    ensure!((0.0..=1.0).contains(&s.top_p), "top_p must be within [0, 1], got {}", s.top_p);
    ensure!(
        (-2.0..=2.0).contains(&s.frequency_penalty),
        "frequency_penalty must be within [-2, 2], got {}",
        s.frequency_penalty
    );
    ensure!(
        (-2.0..=2.0).contains(&s.presence_penalty),
        "presence_penalty must be within [-2, 2], got {}",
        s.presence_penalty
    );
    Ok(())
}

fn default_urls_file() -> PathBuf {
    PathBuf::from("auxiliar/wiki_additives.json")
}

fn default_container_selector() -> String {
    "div.mw-parser-output".to_string()
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_temperature() -> f32 {
    Sampling::default().temperature
}

fn default_top_p() -> f32 {
    Sampling::default().top_p
}

fn default_penalty() -> f32 {
    Sampling::default().frequency_penalty
}

fn default_summary_messages() -> Vec<Message> {
    vec![
        Message::system("You are an assistant that summarizes texts."),
        Message::user(
            "Please, summarize the following text. Focus on synonyms, E number (European Union \
             identifiers), food additive functional classes, and food industry applications: {text}",
        ),
        Message::user("Make sure to highlight food industry applications and do not add any other applications."),
        Message::user("Build a paragraph no longer than 250 words."),
        Message::user(
            "Do not include any historical data or chemical compounds and pharmaceutical applications in the paragraph.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_dir;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = test_dir("settings_defaults");
        let s = SummarizeSettings::load(&dir).unwrap();
        assert_eq!(s.openai_model, "gpt-3.5-turbo");
        assert_eq!(s.batch_size, 10);
        assert_eq!(s.sampling(), Sampling::default());
        assert!(s.messages().iter().any(|m| m.content.contains("{text}")));

        let scrape = ScrapeSettings::load(&dir).unwrap();
        assert_eq!(scrape.container_selector, "div.mw-parser-output");
    }

    #[test]
    fn json_file_values_are_used() {
        let dir = test_dir("settings_file");
        std::fs::write(
            dir.join(SUMMARIZE_CONFIG),
            r#"{
                "openai_model": "gpt-4o-mini",
                "batch_size": 3,
                "temperature": 0.5,
                "messages": [{"role": "user", "content": "Summarize: {text}"}]
            }"#,
        )
        .unwrap();

        let s = SummarizeSettings::load(&dir).unwrap();
        assert_eq!(s.openai_model, "gpt-4o-mini");
        assert_eq!(s.batch_size, 3);
        assert_eq!(s.temperature, 0.5);
        assert_eq!(s.top_p, 0.9);
        assert_eq!(s.messages(), vec![Message::user("Summarize: {text}")]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let dir = test_dir("settings_zero_batch");
        std::fs::write(dir.join(SUMMARIZE_CONFIG), r#"{"batch_size": 0}"#).unwrap();
        assert!(SummarizeSettings::load(&dir).is_err());
    }

    #[test]
    fn out_of_range_top_p_is_rejected() {
        let dir = test_dir("settings_top_p");
        std::fs::write(dir.join(STRUCTURE_CONFIG), r#"{"top_p": 1.5}"#).unwrap();
        assert!(StructureSettings::load(&dir).is_err());
    }

    #[test]
    fn base_prompt_must_exist() {
        let dir = test_dir("settings_prompt");
        assert!(BasePrompt::load(&dir).is_err());
        std::fs::write(dir.join(BASE_PROMPT), r#"{"base_prompt": "Extract from {i}"}"#).unwrap();
        assert_eq!(BasePrompt::load(&dir).unwrap().base_prompt, "Extract from {i}");
    }
}
