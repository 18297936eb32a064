use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use image_manager::client::Client;
use image_manager::config::{Config, DEFAULT_CONFIG_PATH};
use image_manager::services::retention::{RetentionSweeper, RetentionWorker};
use image_manager::services::token_service::issue_token;
use image_manager::{AppState, create_app};
use std::path::PathBuf;
use tokio::signal;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "image-manager",
    version,
    about = "Receives build artifacts, verifies their checksums and expires old ones"
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the upload server
    Server {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(short, long, default_value = "0.0.0.0:8080")]
        address: String,

        /// Storage root, overrides the configuration
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Upload files to a channel
    Client {
        #[arg(short, long, default_value = "http://localhost:8080")]
        address: String,

        #[arg(short, long, env = "IMAGE_MANAGER_TOKEN", hide_env_values = true)]
        token: String,

        #[arg(short, long)]
        channel: String,

        /// Image to upload
        #[arg(long)]
        iso: Option<PathBuf>,

        /// Checksum file to upload
        #[arg(long)]
        checksum: Option<PathBuf>,

        files: Vec<PathBuf>,
    },

    /// Issue a new API token
    Gentoken {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(short, long, default_value = "default")]
        name: String,

        /// Validity in days
        #[arg(short, long, default_value_t = 365)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "image_manager=debug,tower_http=debug"
    } else {
        "image_manager=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Server {
            config,
            address,
            path,
        } => run_server(config, address, path).await,
        Command::Client {
            address,
            token,
            channel,
            iso,
            checksum,
            files,
        } => {
            let files: Vec<PathBuf> = iso.into_iter().chain(checksum).chain(files).collect();
            run_client(&address, token, &channel, &files).await
        }
        Command::Gentoken { config, name, days } => generate_token(config, &name, days),
    }
}

async fn run_server(
    config_path: PathBuf,
    address: String,
    storage: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("🚀 Starting image-manager {}...", env!("CARGO_PKG_VERSION"));

    let mut config = Config::open(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.apply_env();
    if let Some(storage) = storage {
        config.storage = storage;
    }

    if config.storage.as_os_str().is_empty() {
        bail!("storage path is not configured");
    }
    if config.secret_key.is_empty() {
        bail!("secret key is not configured, run `image-manager gentoken` or set JWT_SECRET");
    }
    if config.channels.is_empty() {
        tracing::warn!("No channels configured, every upload will be rejected");
    }

    let retention = config.retention.clone();
    info!(
        "🗂️  Storage at {} with {} channel(s), uploads up to {}MB",
        config.storage.display(),
        config.channels.len(),
        config.server.max_upload_bytes / 1024 / 1024
    );

    let state = AppState::new(config);
    state
        .storage
        .prepare()
        .await
        .context("failed to create channel directories")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = RetentionWorker::new(
        RetentionSweeper::new(state.storage.clone(), retention.max_age()),
        retention.interval(),
        shutdown_rx,
    );
    let worker_handle = tokio::spawn(worker.run());

    let app = create_app(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        info!(
                            "📤 Finished in {:?} with status {}",
                            latency,
                            response.status()
                        );
                    },
                ),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!("✅ Server ready at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    worker_handle.await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn run_client(
    address: &str,
    token: String,
    channel: &str,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    if token.is_empty() {
        bail!("a token is required, pass --token or set IMAGE_MANAGER_TOKEN");
    }
    if files.is_empty() {
        bail!("nothing to upload");
    }

    let client = Client::new(address, token)?;
    let response = client.upload(channel, files).await?;

    for file in &response.files {
        info!(
            "Uploaded {} to \"{}\" ({} bytes, sha256 {})",
            file.name, response.channel, file.size, file.checksum
        );
    }
    info!("Done!");
    Ok(())
}

fn generate_token(config_path: PathBuf, name: &str, days: i64) -> anyhow::Result<()> {
    if days <= 0 {
        bail!("--days must be positive");
    }

    let mut config = Config::create(&config_path)
        .with_context(|| format!("failed to open {}", config_path.display()))?;
    let token = issue_token(&mut config, name, chrono::Duration::days(days))?;
    config.save()?;

    println!("{}", token);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
