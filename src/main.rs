use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use rating_materializer::{
    args::Args,
    database::{db::DbClient, db_structs::ConfigSummary, MatchRepository, RepositoryError},
    materializer::{
        selection::{find_by_hash_prefix, find_by_name, SelectionError, DEFAULT_CONFIG_NAME},
        MaterializationError, Materializer
    },
    model::{rating_model::OpenSkillModel, structures::stage::Stage},
    utils::hash_utils::short_hash
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
enum Failure {
    #[error(transparent)]
    Materialization(#[from] MaterializationError),
    #[error(transparent)]
    Selection(#[from] SelectionError)
}

impl Failure {
    fn kind(&self) -> &'static str {
        match self {
            Failure::Materialization(e) => e.kind(),
            Failure::Selection(_) => "selection"
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Failure::Materialization(e) => e.is_retryable(),
            Failure::Selection(_) => false
        }
    }

    fn exit_code(&self) -> u8 {
        match self.kind() {
            "selection" => 2,
            "invalid_config" => 3,
            "config_not_found" => 4,
            "timeout" => 6,
            "internal" => 1,
            _ => 5
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(&args).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!("Materialization failed: {}", failure);
            println!(
                "{}",
                json!({
                    "status": "error",
                    "kind": failure.kind(),
                    "message": failure.to_string(),
                    "retryable": failure.retryable()
                })
            );
            ExitCode::from(failure.exit_code())
        }
    }
}

fn init_tracing(log_level: &str) {
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer())
        )
        .with(indicatif_layer)
        .init();
}

async fn run(args: &Args) -> Result<Value, Failure> {
    let client = DbClient::connect(&args.connection_string)
        .await
        .map_err(|source| repository_failure(Stage::LoadingConfig, source))?;
    let client = Arc::new(client);

    if args.list {
        return list_configurations(client.as_ref()).await;
    }

    let config_hash = resolve_config_hash(client.as_ref(), args).await?;

    info!("Starting materialization for {}...", short_hash(&config_hash));
    let materializer = Materializer::new(client.clone(), client, OpenSkillModel::default());
    let outcome = materializer
        .materialize_within(&config_hash, args.force_refresh, Duration::from_secs(args.timeout_secs))
        .await?;

    Ok(json!(outcome))
}

async fn list_configurations(client: &DbClient) -> Result<Value, Failure> {
    let configs = client
        .list_configs()
        .await
        .map_err(|source| repository_failure(Stage::LoadingConfig, source))?;

    if configs.is_empty() {
        info!("No configurations found in database");
    }

    for config in &configs {
        let label = if config.is_official { "official" } else { "experimental" };
        info!("{}... | {} | {}", short_hash(&config.config_hash), config.name, label);
    }

    Ok(json!(configs))
}

/// A full hash is used as given. A short hash or a name is looked up among
/// the stored configurations and must match exactly one.
async fn resolve_config_hash(client: &DbClient, args: &Args) -> Result<String, Failure> {
    if let Some(hash) = args.config_hash.as_ref().filter(|hash| hash.len() == 64) {
        return Ok(hash.clone());
    }

    let configs: Vec<ConfigSummary> = client
        .list_configs()
        .await
        .map_err(|source| repository_failure(Stage::LoadingConfig, source))?;

    let found = match (&args.config_hash, &args.config) {
        (Some(prefix), _) => find_by_hash_prefix(&configs, prefix)?,
        (None, Some(name)) => find_by_name(&configs, name)?,
        (None, None) => {
            info!("No config specified, looking for {}...", DEFAULT_CONFIG_NAME);
            find_by_name(&configs, DEFAULT_CONFIG_NAME)?
        }
    };

    info!("Found config: {} ({}...)", found.name, short_hash(&found.config_hash));
    Ok(found.config_hash.clone())
}

fn repository_failure(stage: Stage, source: RepositoryError) -> Failure {
    Failure::Materialization(MaterializationError::Repository { stage, source })
}
