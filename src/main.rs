//! Command-line runner: reads skills, streams pipeline events as JSON lines
//!
//! Usage: `interview-pipeline [--config PATH] [SKILLS_FILE | -]`
//!
//! Skills are read one per line from the file, or from stdin when the file
//! is omitted or `-`. Logs go to stderr. Ctrl-C cancels the run; every skill
//! is still reported before the final `complete` event.

use anyhow::{Context, Result};
use clap::Parser;
use interview_pipeline::context::build_estimator;
use interview_pipeline::metrics::METRICS;
use interview_pipeline::providers::{ChatDiscoverer, ChatGenerator};
use interview_pipeline::{init_tracing, Config, PipelineEvent, PipelineOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "interview-pipeline",
    about = "Generate interview questions for a list of skills",
    version
)]
struct Args {
    /// TOML configuration file; defaults come from INTERVIEW__ env vars
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skills file, one skill per line; `-` or nothing reads stdin
    input: Option<PathBuf>,
}

impl Args {
    /// Skills file to read, `None` for stdin
    fn input_file(&self) -> Option<&PathBuf> {
        self.input.as_ref().filter(|path| path.as_os_str() != "-")
    }
}

async fn read_skills(input: Option<&PathBuf>) -> Result<Vec<String>> {
    let raw = match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read skills from stdin")?;
            raw
        }
    };

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            let config = Config::from_env();
            config.validate()?;
            config
        }
    };
    init_tracing(&config.logging);

    let skills = read_skills(args.input_file()).await?;
    info!("Read {} skills", skills.len());

    let estimator = build_estimator(config.providers.discovery.estimator)?;
    let discoverer = Arc::new(ChatDiscoverer::new(
        config.providers.discovery.clone(),
        estimator,
    )?);
    let generator = Arc::new(ChatGenerator::new(config.providers.generation.clone())?);
    let orchestrator = PipelineOrchestrator::new(config, discoverer, generator)?;

    let mut run = orchestrator.run(skills);
    let cancel = run.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut failed = 0;
    while let Some(event) = run.next().await {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;

        if let PipelineEvent::Complete(summary) = &event {
            failed = summary.failed;
            info!(
                "Run {} took {}ms: {}/{} succeeded",
                summary.run_id,
                summary.duration_ms(),
                summary.succeeded,
                summary.total_skills
            );
        }
    }
    stdout.flush().await?;
    debug!("Run metrics:\n{}", METRICS.export_prometheus());

    if failed > 0 {
        warn!("{} skills failed", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("interview-pipeline").chain(list.iter().copied()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--config", "pipeline.toml", "skills.txt"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("pipeline.toml")));
        assert_eq!(parsed.input_file(), Some(&PathBuf::from("skills.txt")));

        let parsed = args(&["-c", "other.toml"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("other.toml")));
        assert!(parsed.input_file().is_none());

        let parsed = args(&["-"]).unwrap();
        assert!(parsed.input_file().is_none());
    }

    #[test]
    fn test_parse_args_rejects_unknown_flags() {
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["--config"]).is_err());
        assert!(args(&["a.txt", "b.txt"]).is_err());
    }

    #[tokio::test]
    async fn test_read_skills_skips_blank_lines() {
        let mut path = std::env::temp_dir();
        path.push(format!("skills-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "Rust\n\n  Kafka  \nRust\n").await.unwrap();

        let skills = read_skills(Some(&path)).await.unwrap();
        tokio::fs::remove_file(&path).await.ok();
        assert_eq!(skills, vec!["Rust", "Kafka", "Rust"]);
    }
}
