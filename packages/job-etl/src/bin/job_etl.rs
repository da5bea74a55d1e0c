//! Runs one pipeline pass against the configured source, provider and
//! Postgres environments, then prints the run report as JSON.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use job_etl::ai::OpenAI;
use job_etl::{
    Analyzer, AnalyzerConfig, EmbeddingConfig, EmbeddingGenerator, HttpListingSource,
    Orchestrator, PostgresRepository, RecordStore, RunOptions, Spider, SpiderConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runner configuration loaded from environment variables
#[derive(Debug, Clone)]
struct Config {
    source_url: String,
    staging_database_url: String,
    live_database_url: String,
    max_records: usize,
    continue_on_error: bool,
    skip_processing: bool,
    skip_storage: bool,
    promote: bool,
}

impl Config {
    fn from_env() -> Result<Self> {
        let staging_database_url =
            env::var("STAGING_DATABASE_URL").context("STAGING_DATABASE_URL must be set")?;

        Ok(Self {
            source_url: env::var("JOB_SOURCE_URL").context("JOB_SOURCE_URL must be set")?,
            live_database_url: env::var("LIVE_DATABASE_URL")
                .unwrap_or_else(|_| staging_database_url.clone()),
            staging_database_url,
            max_records: env::var("JOB_ETL_MAX_RECORDS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("JOB_ETL_MAX_RECORDS must be a valid number")?,
            continue_on_error: flag("JOB_ETL_CONTINUE_ON_ERROR", true)?,
            skip_processing: flag("JOB_ETL_SKIP_PROCESSING", false)?,
            skip_storage: flag("JOB_ETL_SKIP_STORAGE", false)?,
            promote: flag("JOB_ETL_PROMOTE", false)?,
        })
    }

    fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new()
            .with_max_records(self.max_records)
            .with_continue_on_error(self.continue_on_error);
        if self.skip_processing {
            options = options.skip_processing();
        }
        if self.skip_storage {
            options = options.skip_storage();
        }
        options
    }
}

fn flag(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => bail!("{name} must be a boolean, got {other:?}"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_etl=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(source = %config.source_url, "Starting job-listing ETL");

    let spider_config = SpiderConfig::new(&config.source_url);
    let source = HttpListingSource::new(&spider_config).context("Failed to build listing source")?;
    let openai = OpenAI::from_env().context("Failed to configure OpenAI provider")?;

    let repository = Arc::new(
        PostgresRepository::connect(&config.staging_database_url, &config.live_database_url)
            .await
            .context("Failed to connect to database")?,
    );

    let orchestrator = Orchestrator::new(
        Spider::new(source, spider_config),
        Analyzer::new(openai.clone(), AnalyzerConfig::default()),
        EmbeddingGenerator::new(openai, EmbeddingConfig::default()),
        Arc::clone(&repository),
    );

    // Ctrl-C asks the run to stop at the next boundary
    let control = orchestrator.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight work");
            control.stop();
        }
    });

    let report = orchestrator
        .run(config.run_options())
        .await
        .context("Pipeline run failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if config.promote {
        if report.is_success() && !config.skip_storage && !config.skip_processing {
            let promoted = repository
                .promote_to_live()
                .await
                .context("Failed to promote staging records")?;
            info!(promoted, "Promoted staging records to live");
        } else {
            warn!(state = %report.state, "Run did not complete, skipping promotion");
        }
    }

    if !report.is_success() {
        bail!("run ended in state {}", report.state);
    }
    Ok(())
}
