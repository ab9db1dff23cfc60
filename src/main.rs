use clap::Parser;
use pinchat::{build_router, AppConfig, AppState, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "pinchat",
    about = "PIN-gated chat web app backend — relay conversations to any OpenAI-compatible LLM provider",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream model identifier (overrides config)
    #[arg(long)]
    model: Option<String>,

    /// Directory with the pre-built SPA (overrides config)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Log file path
    #[arg(long, default_value = "pinchat.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pinchat=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. pinchat.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/pinchat/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/pinchat/config.toml");
            println!("     ~/.config/pinchat/config.toml");
        }
        println!("  3. ~/.pinchat.toml");
        return Ok(());
    }

    let mut config = AppConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(model) = cli.model {
        config.provider.model = model;
    }
    if let Some(static_dir) = cli.static_dir {
        config.static_dir = static_dir;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    // Secrets and endpoint are resolved exactly once, here; request handlers
    // only see the resolved values.
    let provider = config.resolve_provider()?;
    let pin = config.resolve_pin()?;

    info!("pinchat v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:    {}", config.provider.name);
    info!("  Base URL:    {}", provider.base_url);
    info!("  Model:       {}", provider.model);
    info!("  Static dir:  {}", config.static_dir.display());
    info!("  Stream:      {:?}", config.stream.format);
    info!("  Port:        {}", config.port);
    info!("  Log file:    {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting pinchat provider={} base_url={} port={}",
            config.provider.name, provider.base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;

    let state = Arc::new(AppState {
        metrics: Arc::new(pinchat::RelayMetrics::default()),
        provider,
        pin,
        client,
        logger: logger.clone(),
        config: config.clone(),
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
