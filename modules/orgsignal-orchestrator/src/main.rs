use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use backend_client::{AnalysisClient, OpportunityClient, PersistenceClient};
use orgsignal_common::{Config, Organization, RawSignal, RetrieveFilter, StageId};
use orgsignal_orchestrator::persistence::MemoryProfileStore;
use orgsignal_orchestrator::pipeline::{Coordinator, PipelineDeps, PipelineRequest};
use orgsignal_orchestrator::traits::{ProfileStore, SystemClock};

#[derive(Parser)]
#[command(name = "orgsignal", about = "Organization intelligence pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct OrgArgs {
    /// Organization name
    #[arg(long)]
    org: String,
    #[arg(long)]
    industry: Option<String>,
    #[arg(long = "competitor")]
    competitors: Vec<String>,
    #[arg(long = "regulator")]
    regulators: Vec<String>,
    #[arg(long = "keyword")]
    keywords: Vec<String>,
}

impl OrgArgs {
    fn organization(&self) -> Organization {
        let mut org = Organization::new(self.org.trim());
        org.industry = self.industry.clone();
        org.stakeholders.competitors = self.competitors.clone();
        org.stakeholders.regulators = self.regulators.clone();
        org.keywords = self.keywords.clone();
        org
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline and print the report as JSON
    Run {
        #[command(flatten)]
        org: OrgArgs,
        /// JSON file with an array of raw signals
        #[arg(long)]
        signals: Option<PathBuf>,
    },
    /// Run a single stage
    Stage {
        #[command(flatten)]
        org: OrgArgs,
        #[arg(long)]
        stage: StageId,
    },
    /// Show persisted stage records
    History {
        #[arg(long)]
        org: String,
        #[arg(long = "stage")]
        stages: Vec<StageId>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("orgsignal=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let token = config.backend_token.as_deref();
    let store: Arc<dyn ProfileStore> = match &config.persistence_url {
        Some(url) => Arc::new(PersistenceClient::new(url, token)),
        None => {
            info!("No persistence URL configured, using in-memory profile store");
            Arc::new(MemoryProfileStore::new(Arc::new(SystemClock)))
        }
    };
    let deps = PipelineDeps::from_config(
        &config,
        Arc::new(AnalysisClient::new(&config.backend_url, token)),
        Arc::new(OpportunityClient::new(&config.opportunity_url, token)),
        store,
    );
    let coordinator = Coordinator::new(deps);

    match cli.command {
        Command::Run { org, signals } => {
            let raw_signals = match signals {
                Some(path) => load_signals(&path)?,
                None => Vec::new(),
            };
            let request = PipelineRequest::new(org.organization()).with_signals(raw_signals);
            let report = coordinator.run(request).await;
            eprintln!("{}", report.stats());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stage { org, stage } => {
            let outcome = coordinator.run_stage(stage, &org.organization()).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::History { org, stages, limit } => {
            let filter = RetrieveFilter {
                stages,
                since: None,
                limit,
            };
            let records = coordinator.history(&org, &filter).await?;
            info!(org = org.as_str(), records = records.len(), "History loaded");
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

fn load_signals(path: &Path) -> Result<Vec<RawSignal>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read signals file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid signals JSON in {}", path.display()))
}
