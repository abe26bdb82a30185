use anyhow::{Context, Result};
use calgate::accounts::AccountLinker;
use calgate::api::{cors_layer, create_router, OAuthAppState, PipelineState};
use calgate::config::{AppConfig, DEFAULT_OUTBOUND_TIMEOUT_SECS};
use calgate::credentials::CredentialStore;
use calgate::delegation::DelegatedCredentialManager;
use calgate::oauth::ProviderClient;
use calgate::session::SessionSigner;
use calgate::workspace::HttpWorkspaceProvisioner;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Timeout for workspace provisioning calls
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(DEFAULT_OUTBOUND_TIMEOUT_SECS);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calgate=info".into()),
        )
        .init();

    info!("Calgate starting...");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let settings = &config.settings;

    info!(
        port = settings.server.port,
        database = %settings.server.database,
        token_url = %settings.provider.token_url,
        workspace_url = %settings.workspace.url,
        cors_origin = %settings.server.cors_origin,
        refresh_timeout_secs = settings.refresh.timeout_secs,
        dedupe_refresh = settings.refresh.dedupe,
        "Configuration loaded"
    );

    let store = Arc::new(
        CredentialStore::new(&settings.server.database)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let provider = Arc::new(
        ProviderClient::new(config.provider.clone(), config.provider_timeout())
            .context("Failed to initialize provider client")?,
    );
    let provisioner = Arc::new(
        HttpWorkspaceProvisioner::new(settings.workspace.url.clone(), OUTBOUND_TIMEOUT)
            .context("Failed to initialize workspace client")?,
    );

    let mut manager = DelegatedCredentialManager::new(
        store.clone(),
        provider.clone(),
        config.secrets.encryption_key.clone(),
    )
    .with_refresh_timeout(config.refresh_timeout());
    if settings.refresh.dedupe {
        manager = manager.with_refresh_guard();
    }

    let signer = SessionSigner::new(&config.secrets.signing_key);

    let linker = AccountLinker::new(
        store.clone(),
        store.clone(),
        provisioner,
        config.secrets.encryption_key.clone(),
    );

    let router = create_router(
        PipelineState {
            signer: signer.clone(),
            credentials: Arc::new(manager),
        },
        OAuthAppState {
            provider,
            linker: Arc::new(linker),
            signer,
        },
    )
    .layer(cors_layer(&settings.server.cors_origin)?);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.server.port))
        .await
        .context("Failed to bind API port")?;
    info!(port = settings.server.port, "Calgate listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Calgate stopped");

    Ok(())
}
