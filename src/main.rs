use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagecast::cdp::CdpClient;
use pagecast::config::AppConfig;
use pagecast::state::AppState;
use pagecast::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Pagecast command line arguments
#[derive(Parser, Debug)]
#[command(name = "pagecast")]
#[command(version, about = "Near-real-time remote viewer for headless browser sessions", long_about = None)]
struct CliArgs {
    /// Listen address
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Listen port
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// DevTools WebSocket endpoint of the running browser
    #[arg(short = 'b', long, value_name = "URL")]
    browser: Option<String>,

    /// URL of the encoder sandbox document
    #[arg(long, value_name = "URL")]
    encoder_url: Option<String>,

    /// Default capture width before the viewer resizes
    #[arg(long, value_name = "PIXELS")]
    width: Option<u32>,

    /// Default capture height before the viewer resizes
    #[arg(long, value_name = "PIXELS")]
    height: Option<u32>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting pagecast v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::default();
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(browser) = args.browser {
        config.browser.ws_endpoint = browser;
    }
    if let Some(encoder_url) = args.encoder_url {
        config.browser.encoder_url = encoder_url;
    }
    if let Some(width) = args.width {
        config.capture.width = width;
    }
    if let Some(height) = args.height {
        config.capture.height = height;
    }

    // The browser connection is the one thing startup cannot do without
    let cdp = CdpClient::connect(&config.browser.ws_endpoint).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let state = AppState::new(config.clone(), cdp, shutdown_tx.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.address, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Viewer endpoint listening on http://{}/ws/viewer", addr);

    let router = web::create_router(state.clone());
    let serve_state = state.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
            serve_state.close_all().await;
        })
        .await?;

    state.cdp.shutdown();
    tracing::info!("Pagecast stopped");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "pagecast=error,tower_http=error",
        LogLevel::Warn => "pagecast=warn,tower_http=warn",
        LogLevel::Info => "pagecast=info,tower_http=info",
        LogLevel::Verbose => "pagecast=debug,tower_http=info",
        LogLevel::Debug => "pagecast=debug,tower_http=debug",
        LogLevel::Trace => "pagecast=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
