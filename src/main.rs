mod finetune;
mod llm;
mod report;
mod scrape;
mod settings;
mod store;
mod structure;
mod summarize;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, ensure, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tracing::info;

use llm::OpenAIClient;
use settings::{BasePrompt, ScrapeSettings, StructureSettings, SummarizeSettings};
use store::{Checkpoint, PROCESSED_DIR, RAW_DIR};

#[derive(Parser)]
#[command(name = "additive_pipeline", about = "Food additive dataset pipeline: scrape, summarize, structure")]
struct Cli {
    /// Directory holding the stage configs and .env
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    /// Root of the data tree (auxiliar/, raw/, interim/, processed/)
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape description text for every URL in the URL list
    Scrape {
        /// URL list to use instead of the configured one
        #[arg(long)]
        urls: Option<PathBuf>,
    },
    /// Summarize a description map in checkpointed batches
    Summarize {
        /// Description map, e.g. data/raw/additives_descriptions_pre.json
        input: PathBuf,
        /// Checkpoint name; re-running with the same id resumes (default: hash of input)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Extract structured entities from a summary map and build fine-tuning examples
    Structure {
        /// Summary map, e.g. data/interim/descr_summ_<run id>.json
        input: PathBuf,
    },
    /// Show counts for a summary checkpoint
    Stats {
        checkpoint: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scrape { urls } => run_scrape(&cli.config_dir, &cli.data_dir, urls).await,
        Commands::Summarize { input, run_id } => {
            run_summarize(&cli.config_dir, &cli.data_dir, &input, run_id).await
        }
        Commands::Structure { input } => run_structure(&cli.config_dir, &cli.data_dir, &input).await,
        Commands::Stats { checkpoint } => {
            ensure!(checkpoint.exists(), "{} does not exist", checkpoint.display());
            let cp = Checkpoint::open(&checkpoint)?;
            let (summaries, errors) = cp.tally();
            println!("Entries:   {}", cp.len());
            println!("Summaries: {}", summaries);
            println!("Errors:    {}", errors);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_scrape(config_dir: &Path, data_dir: &Path, urls: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = ScrapeSettings::load(config_dir)?;
    let urls_path = urls.unwrap_or_else(|| data_dir.join(&settings.urls_file));
    let list: scrape::UrlList = store::read_json(&urls_path)?;
    if list.urls.is_empty() {
        println!("No URLs in {}.", urls_path.display());
        return Ok(());
    }

    let container = scraper::Selector::parse(&settings.container_selector)
        .map_err(|e| anyhow!("Invalid container selector {:?}: {}", settings.container_selector, e))?;
    let source = scrape::HttpSource::new(&settings.user_agent)?;

    println!("Scraping {} pages...", list.urls.len());
    let pb = progress_bar(list.urls.len())?;
    let out = scrape::scrape_all(&source, &list.urls, &container, &pb).await;
    pb.finish_and_clear();

    let raw_dir = data_dir.join(RAW_DIR);
    let descriptions = Value::Object(out.descriptions);
    store::write_json(&raw_dir.join("additives_descriptions.json"), &descriptions)?;
    store::write_json(
        &raw_dir.join("additives_descriptions_pre.json"),
        &scrape::clean_newlines(&descriptions),
    )?;
    store::write_json(&raw_dir.join("failed_urls.json"), &out.failed)?;

    out.stats.print("Scraped");
    println!("Descriptions saved to {}", raw_dir.display());
    Ok(())
}

async fn run_summarize(
    config_dir: &Path,
    data_dir: &Path,
    input: &Path,
    run_id: Option<String>,
) -> anyhow::Result<()> {
    settings::load_env(config_dir)?;
    let settings = SummarizeSettings::load(config_dir)?;

    let raw = std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let descriptions: Map<String, Value> =
        serde_json::from_slice(&raw).with_context(|| format!("Invalid JSON in {}", input.display()))?;
    let texts = summarize::flatten_descriptions(&descriptions);

    let client = OpenAIClient::from_env()?;
    println!("Successfully loaded the API key.");

    let run_id = run_id.unwrap_or_else(|| store::content_run_id(&raw));
    let mut checkpoint = Checkpoint::open(store::checkpoint_path(data_dir, &run_id)?)?;
    println!("Run {} -> {}", run_id, checkpoint.path().display());
    if !checkpoint.is_empty() {
        println!("Resuming: {} entries already in checkpoint", checkpoint.len());
    }

    let job = summarize::SummaryJob {
        model: settings.openai_model.clone(),
        messages: settings.messages(),
        sampling: settings.sampling(),
        batch_size: settings.batch_size,
    };
    info!(base_url = client.base_url(), model = %job.model, batch_size = job.batch_size, texts = texts.len(), "Starting summarization");

    let pb = progress_bar(texts.len())?;
    let stats = summarize::summarize_all(&client, &job, &texts, &mut checkpoint, &pb).await?;
    pb.finish_and_clear();

    stats.print("Summarized");
    println!("Summaries saved to {}", checkpoint.path().display());
    Ok(())
}

async fn run_structure(config_dir: &Path, data_dir: &Path, input: &Path) -> anyhow::Result<()> {
    settings::load_env(config_dir)?;
    let settings = StructureSettings::load(config_dir)?;
    let prompt = BasePrompt::load(config_dir)?;
    ensure!(input.exists(), "{} does not exist", input.display());
    let data: Map<String, Value> = store::read_json(input)?;

    let client = OpenAIClient::from_env()?;
    println!("Successfully loaded the API key.");

    let job = structure::ExtractionJob {
        model: settings.openai_model.clone(),
        prompt_template: prompt.base_prompt,
        sampling: settings.sampling(),
        json_mode: settings.json_mode,
    };

    info!(base_url = client.base_url(), model = %job.model, json_mode = job.json_mode, "Starting extraction");
    println!("Extracting entities from {} texts...", data.len());
    let pb = progress_bar(data.len())?;
    let extracted = structure::extract_all(&client, &job, &data, &pb).await;
    pb.finish_and_clear();

    let stamp = chrono::Local::now().format("%Y-%m-%d_%H%M%S");
    let out_dir = data_dir.join(PROCESSED_DIR);
    let records_path = out_dir.join(format!("structure_output_{}.json", stamp));
    store::write_json(&records_path, &extracted.records)?;
    if !extracted.failures.is_empty() {
        store::write_json(&out_dir.join(format!("structure_failures_{}.json", stamp)), &extracted.failures)?;
    }
    extracted.stats.print("Extracted");
    println!("Results saved to {}", records_path.display());

    let pb = progress_bar(extracted.records.len())?;
    let finetune = structure::build_finetune(&extracted.records, &finetune::SpanFormatter, &pb);
    pb.finish_and_clear();

    let examples_path = out_dir.join(format!("processed_structure_output_{}.json", stamp));
    store::write_json(&examples_path, &finetune.examples)?;
    finetune.stats.print("Fine-tuning examples");
    println!("Examples saved to {}", examples_path.display());
    Ok(())
}

fn progress_bar(len: usize) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
