//! CLI commands for chatrelay using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::channels::create_sender;
use crate::config::{get_settings_path, load_settings, load_settings_or_default, save_settings, Settings};
use crate::core::DispatchQueue;
use crate::providers::{create_completion_service, create_ingestion_client, IngestionClient, JobState, JobStatus};
use crate::web::{run_server, AppState};
use crate::worker::Worker;

/// chatrelay - relay chat messages to an AI completion service.
#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version)]
#[command(about = "Relay chat messages to an AI completion service", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a default settings file
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },

    /// Run the dispatcher and the HTTP API
    Serve {
        /// Port override
        #[arg(short, long, env = "CHATRELAY_PORT")]
        port: Option<u16>,
    },

    /// Print the effective settings
    Config,

    /// Upload a document to the knowledge base
    IngestFile {
        /// Document path
        path: PathBuf,

        /// Poll until the ingestion job finishes
        #[arg(long)]
        wait: bool,
    },

    /// Ask the knowledge base to ingest a URL
    IngestUrl {
        /// Document URL
        url: String,

        /// Poll until the ingestion job finishes
        #[arg(long)]
        wait: bool,
    },

    /// Show an ingestion job
    Job {
        /// Job ID
        id: String,

        /// Poll until the job finishes
        #[arg(long)]
        wait: bool,
    },
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Init { force } => cmd_init(*force),
            Command::Serve { port } => cmd_serve(*port).await,
            Command::Config => cmd_config(),
            Command::IngestFile { path, wait } => cmd_ingest_file(path, *wait).await,
            Command::IngestUrl { url, wait } => cmd_ingest_url(url, *wait).await,
            Command::Job { id, wait } => cmd_job(id, *wait).await,
        }
    }
}

// Command implementations

fn cmd_init(force: bool) -> Result<()> {
    let path = get_settings_path()?;
    if path.exists() && !force {
        anyhow::bail!(
            "Settings already exist at {} (use --force to overwrite)",
            path.display()
        );
    }

    save_settings(&Settings::default(), &path)?;
    println!("Wrote default settings to {}", path.display());
    println!("Set service.base_url and service.chatbot_id before running 'chatrelay serve'.");
    Ok(())
}

async fn cmd_serve(port: Option<u16>) -> Result<()> {
    let mut settings = load_settings()?;
    if let Some(port) = port {
        settings.web.port = port;
    }

    let completion = create_completion_service(&settings)?;
    let sender = create_sender(&settings)?;
    let worker = Worker::from_settings(&settings, completion, sender)?;

    let queue = DispatchQueue::new(&settings.dispatch, Arc::new(worker));
    let dispatcher = queue.start()?;

    println!("chatrelay listening on {}:{}", settings.web.host, settings.web.port);
    println!("  POST   /api/messages");
    println!("  GET    /api/queue/stats");
    println!("  DELETE /api/queue[/:conversation_id]");
    println!("Press Ctrl+C to stop");

    let stopping = Arc::clone(&queue);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        tracing::info!("Shutdown requested");
        stopping.shutdown();
    };

    let served = run_server(&settings.web, AppState { queue: Arc::clone(&queue) }, shutdown).await;

    queue.shutdown();
    if let Err(e) = dispatcher.await {
        tracing::error!("Dispatcher task failed: {}", e);
    }
    println!("\n{}", queue.stats().await);

    served?;
    Ok(())
}

fn cmd_config() -> Result<()> {
    let mut settings = load_settings_or_default();
    if settings.service.api_key.is_some() {
        settings.service.api_key = Some("********".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn cmd_ingest_file(path: &Path, wait: bool) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("Not a file: {}", path.display());
    }

    let client = ingestion_client()?;
    let job = client.submit_file(path).await?;
    println!("Submitted {} as job {} ({})", path.display(), job.job_id, job.status);

    if wait {
        wait_for(&client, &job.job_id).await?;
    }
    Ok(())
}

async fn cmd_ingest_url(url: &str, wait: bool) -> Result<()> {
    let client = ingestion_client()?;
    let job = client.submit_url(url).await?;
    println!("Submitted {} as job {} ({})", url, job.job_id, job.status);

    if wait {
        wait_for(&client, &job.job_id).await?;
    }
    Ok(())
}

async fn cmd_job(id: &str, wait: bool) -> Result<()> {
    let client = ingestion_client()?;

    if wait {
        return wait_for(&client, id).await;
    }

    let status = client.job_status(id).await?;
    println!("{}", describe(id, &status));
    Ok(())
}

fn ingestion_client() -> Result<IngestionClient> {
    let settings = load_settings()?;
    Ok(create_ingestion_client(&settings)?)
}

async fn wait_for(client: &IngestionClient, job_id: &str) -> Result<()> {
    let status = client
        .wait_for_job(job_id, |status| println!("  {}", describe(job_id, status)))
        .await?;

    if status.status == JobState::Failed {
        anyhow::bail!(
            "Ingestion job {} failed: {}",
            job_id,
            status.error.as_deref().unwrap_or("no error reported")
        );
    }
    println!("Ingestion job {} completed", job_id);
    Ok(())
}

fn describe(job_id: &str, status: &JobStatus) -> String {
    let mut line = format!("job {}: {}", job_id, status.status);
    if let Some(progress) = status.progress {
        line.push_str(&format!(" ({:.0}%)", progress_percent(progress)));
    }
    if let Some(error) = &status.error {
        line.push_str(&format!(" - {}", error));
    }
    line
}

/// Services report progress either as a fraction or as a percentage.
fn progress_percent(progress: f64) -> f64 {
    if progress <= 1.0 {
        progress * 100.0
    } else {
        progress.min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Commands::try_parse_from(["chatrelay", "serve", "--port", "8080"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { port: Some(8080) }));

        let cli = Commands::try_parse_from(["chatrelay", "ingest-url", "https://who.int", "--wait"])
            .unwrap();
        assert!(matches!(cli.command, Command::IngestUrl { wait: true, .. }));

        assert!(Commands::try_parse_from(["chatrelay", "job"]).is_err());
    }

    #[test]
    fn test_describe_job() {
        let status = JobStatus {
            status: JobState::Processing,
            progress: Some(0.25),
            error: None,
        };
        assert_eq!(describe("j1", &status), "job j1: processing (25%)");

        let status = JobStatus {
            status: JobState::Failed,
            progress: Some(40.0),
            error: Some("bad pdf".into()),
        };
        assert_eq!(describe("j2", &status), "job j2: failed (40%) - bad pdf");
    }
}
