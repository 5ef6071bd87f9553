//! curatord - the curator archive server
//!
//! Wires the configuration into the concrete adapters and runs the two
//! long-lived halves: the API server and the background scheduler.
//!
//! Exit codes: 0 success, 1 generic failure, 2 configuration error,
//! 3 database unreachable.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use curator_api::{ApiServer, AppState};
use curator_core::config::ServerConfig;
use curator_core::domain::{PeerName, Store, StoreKind, StoreName};
use curator_core::ports::{IMetadataRepository, INotifier, IStoreBackend};
use curator_core::registry::{StoreHandles, StoreRegistry};
use curator_core::usecases::{ExchangeUseCase, IngestUseCase, ManifestUseCase, QueryUseCase};
use curator_db::{DatabasePool, SqliteMetadataRepository};
use curator_peer::{CredentialCipher, HttpPeerClient};
use curator_store::{CommitPolicy, LocalStore};
use curator_tasks::{BackgroundConfig, TaskContext, TaskScheduler};
use curator_telemetry::{ErrorReporter, SlackNotifier};
use curator_transfer::{select_async_manager, LocalCopyManager};

const EXIT_GENERIC: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_DATABASE: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "curatord", version, about = "Curator archive server")]
struct Args {
    /// Path of the server configuration file
    #[arg(long, default_value = "/etc/curator/config.yaml")]
    config: PathBuf,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match ServerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Configuration rejected");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if args.check_config {
        info!("Configuration is valid");
        return ExitCode::SUCCESS;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Config(e)) => {
            error!(error = %e, "Configuration error");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(RunError::Database(e)) => {
            error!(error = %e, "Database unreachable");
            ExitCode::from(EXIT_DATABASE)
        }
        Err(RunError::Other(e)) => {
            error!(error = %e, "Fatal error");
            ExitCode::from(EXIT_GENERIC)
        }
    }
}

/// Failure classes that map onto the exit codes
enum RunError {
    Config(anyhow::Error),
    Database(anyhow::Error),
    Other(anyhow::Error),
}

async fn run(config: ServerConfig) -> Result<(), RunError> {
    let pool = DatabasePool::new(std::path::Path::new(&config.database.name))
        .await
        .map_err(|e| RunError::Database(anyhow::Error::new(e)))?;
    let repository: Arc<dyn IMetadataRepository> =
        Arc::new(SqliteMetadataRepository::new(pool.pool().clone()));

    let cipher = Arc::new(
        CredentialCipher::from_key_file(&config.encryption_key_file)
            .map_err(|e| RunError::Config(anyhow::Error::new(e)))?,
    );

    let registry = build_registry(&config, &repository)
        .await
        .map_err(RunError::Config)?;

    let local_name = PeerName::new(config.name.clone())
        .map_err(|e| RunError::Config(anyhow::Error::new(e)))?;

    // Observability: error rows always, webhook forwarding when enabled.
    let mut reporter = ErrorReporter::new(Arc::clone(&repository));
    if config.slack_webhook.enable {
        let url_file = config
            .slack_webhook
            .url_file
            .as_ref()
            .expect("validated at startup");
        let notifier: Arc<dyn INotifier> = Arc::new(
            SlackNotifier::from_url_file(url_file, config.name.clone())
                .map_err(RunError::Config)?,
        );
        reporter = reporter.with_webhook(notifier, &config.slack_webhook);
    }
    let reporter = Arc::new(reporter);

    let ingest = Arc::new(IngestUseCase::new(
        Arc::clone(&repository),
        registry.clone(),
        config.maximal_upload_size_bytes,
    ));
    let query = Arc::new(QueryUseCase::new(
        Arc::clone(&repository),
        registry.clone(),
        config.max_search_results,
    ));
    let exchange = Arc::new(ExchangeUseCase::new(
        Arc::clone(&repository),
        registry.clone(),
    ));
    let manifest = Arc::new(ManifestUseCase::new(
        Arc::clone(&repository),
        local_name.clone(),
    ));

    let state = Arc::new(AppState {
        site_name: config.name.clone(),
        site_description: config.displayed_site_description.clone(),
        repository: Arc::clone(&repository),
        ingest: Arc::clone(&ingest),
        query,
        exchange: Arc::clone(&exchange),
        manifest,
        reporter: Arc::clone(&reporter),
        cipher: Arc::clone(&cipher),
    });

    let server = ApiServer::new(Arc::clone(&state), &config.host, config.port)
        .map_err(RunError::Config)?;

    let shutdown = CancellationToken::new();

    // Background scheduler, when a task document is configured.
    let scheduler_handle = match config.background_config_path() {
        Some(path) => {
            let background = BackgroundConfig::load(&path).map_err(RunError::Config)?;
            let context = TaskContext {
                local_name,
                repository: Arc::clone(&repository),
                registry,
                peer_client: Arc::new(HttpPeerClient::new(
                    Arc::clone(&cipher),
                    config.name.clone(),
                )),
                reporter,
                ingest,
                exchange,
            };
            let mut scheduler = TaskScheduler::new(context, &background);
            if scheduler.is_empty() {
                info!("Background configuration declares no tasks");
                None
            } else {
                let token = shutdown.clone();
                Some(tokio::spawn(async move { scheduler.run(token).await }))
            }
        }
        None => {
            info!("No background configuration; running as API-only instance");
            None
        }
    };

    let server_token = shutdown.clone();
    let server_handle = tokio::spawn(async move { server.run(server_token).await });

    info!(site = %config.name, "Curator instance running");
    wait_for_shutdown().await;
    info!("Shutdown signal received");
    shutdown.cancel();

    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }
    match server_handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RunError::Other(e)),
        Err(e) => Err(RunError::Other(anyhow::Error::new(e))),
    }
}

/// Instantiates the configured stores and records them in the database
async fn build_registry(
    config: &ServerConfig,
    repository: &Arc<dyn IMetadataRepository>,
) -> anyhow::Result<StoreRegistry> {
    let mut registry = StoreRegistry::new();

    for profile in &config.add_stores {
        let name = StoreName::new(profile.store_name.clone())?;

        let backend = Arc::new(LocalStore::new(
            name.clone(),
            profile.store_data.staging_path.clone(),
            profile.store_data.store_path.clone(),
            CommitPolicy {
                group_write_after_stage: profile.store_data.group_write_after_stage,
                own_after_commit: profile.store_data.own_after_commit,
                readonly_after_commit: profile.store_data.readonly_after_commit,
            },
            Arc::clone(repository),
        )?);

        // Seed or refresh the store row; runtime flags survive the upsert.
        let report = backend.report().await?;
        let mut record = Store::new(name.clone(), StoreKind::Local, report.capacity, profile.ingestible);
        record.report_full_fraction = profile.store_data.report_full_fraction;
        if let Some(existing) = repository.get_store(&name).await? {
            record.used = existing.used;
        }
        repository.upsert_store(&record).await?;

        let async_data = &profile.asynchronous_transfer_manager_data;
        registry.insert(
            name,
            StoreHandles {
                backend,
                sync_manager: Arc::new(LocalCopyManager::new()),
                async_manager: select_async_manager(async_data)?,
                async_endpoint: async_data.endpoint.clone(),
                max_live_handles: async_data.max_live_handles,
            },
        );
    }

    info!(stores = registry.len(), "Store registry built");
    Ok(registry)
}

/// Resolves on SIGINT or SIGTERM
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
