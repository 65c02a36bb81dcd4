//! Folio server - HTTP API for the portfolio site

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod agent_context;
mod api;
mod chat_log_store;
mod config;
mod error;
mod github;
mod kv_store;
mod state;
mod storage_layout;
#[cfg(test)]
mod test_env;
mod view_store;

use config::{BindConfig, ServerConfig};
use state::AppState;

#[derive(Debug, Parser)]
#[command(
    name = "folio-server",
    about = "HTTP API server for the folio portfolio site",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio_server=info,folio_core=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting folio server");

    let config = ServerConfig::from_env();
    info!("Database: {}", config.db_path.display());

    let state = AppState::new(&config)?;
    info!(
        compatible = state.capability.compatible,
        reason = state.capability.reason.as_deref().unwrap_or("-"),
        "Local inference capability probed"
    );

    let app = api::create_router(state);

    let addr = BindConfig::resolve(args.host, args.port).address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_and_long_bind_flags_parse() {
        let args = ServerArgs::try_parse_from(["folio-server", "-H", "127.0.0.1", "--port", "9000"])
            .expect("arguments should parse");
        assert_eq!(args.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(args.port, Some(9000));

        let bare = ServerArgs::try_parse_from(["folio-server"]).expect("no arguments is valid");
        assert!(bare.host.is_none() && bare.port.is_none());
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        assert!(ServerArgs::try_parse_from(["folio-server", "--port", "70000"]).is_err());
    }
}
