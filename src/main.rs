//! MCP session multiplexer
//!
//! Serves the streamable `/mcp` endpoint and the legacy `/sse` + `/messages`
//! pair on one loopback port. Each session is bound to its own instance of the
//! bundled MCP server.

use clap::Parser;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use mcp_mux::config::{
    MuxConfig, DEFAULT_MAX_BODY_BYTES, DEFAULT_PORT, DEFAULT_SSE_KEEP_ALIVE_SECS,
};
use mcp_mux::engine::{EngineLink, RmcpEngine};
use mcp_mux::router::{AppContext, MuxService, OriginCheckService};
use mcp_mux::server::MuxServer;
use mcp_mux::session::SessionRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mcp-mux", version, about = "MCP session transport multiplexer")]
struct Cli {
    /// Port to listen on (loopback only)
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Answer streamable POSTs with a JSON body instead of an SSE stream
    #[arg(long)]
    json_response: bool,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_SSE_KEEP_ALIVE_SECS)]
    sse_keep_alive_secs: u64,
    /// Maximum request body size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,
    /// Allowed Origin values (comma-separated, `*` for any). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
}

impl Cli {
    fn into_config(self) -> MuxConfig {
        MuxConfig::default()
            .with_port(self.port)
            .with_json_response(self.json_response)
            .with_sse_keep_alive_secs(self.sse_keep_alive_secs)
            .with_max_body_bytes(self.max_body_bytes)
            .with_allowed_origins(self.allow_origin)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mcp_mux=info")))
        .init();

    let config = Cli::parse().into_config();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create tokio runtime: {e}"))?;
    rt.block_on(serve(config))
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn serve(config: MuxConfig) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr();
    let allowed_origins = Arc::new(config.allowed_origins.clone());

    let registry = Arc::new(SessionRegistry::new());
    let registry_for_engine = registry.clone();
    let engine = RmcpEngine::new(move |link: &EngineLink| {
        MuxServer::new(registry_for_engine.clone(), link)
    });
    let ctx = Arc::new(
        AppContext::new(config, Arc::new(engine)).with_registry(registry.clone()),
    );

    let service = OriginCheckService::new(MuxService::new(ctx), allowed_origins);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!("MCP multiplexer listening on http://{bind_addr}");

    let cancel = CancellationToken::new();
    let cancel_for_shutdown = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            cancel_for_shutdown.cancel();
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("accept failed: {e}");
                        continue;
                    }
                };
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new()
                        .serve_connection(io, TowerToHyperService::new(svc));
                    if let Err(err) = conn.await {
                        tracing::debug!(%peer, "http connection error: {err}");
                    }
                });
            }
        }
    }

    let stats = registry.stats();
    info!(
        streamable = stats.streamable,
        legacy_sse = stats.legacy_sse,
        "Closing live sessions"
    );
    registry.close_all();
    Ok(())
}
