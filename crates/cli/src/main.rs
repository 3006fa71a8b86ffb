use clap::{Parser, Subcommand};
use lib::backend::DifyClient;
use lib::config::{self, Config};
use lib::dedup::DedupStore;
use lib::delivery::{StreamingOptions, WebhookCardTransport};
use lib::extract::ContentExtractor;
use lib::ingress::{run_ingress, IngressState};
use lib::intake::{run_intake_loop, IntakeController};
use lib::recognition::{
    NativeTranscriptProvider, RecognitionPipeline, RecognitionProvider, TranscriptionApiProvider,
};
use lib::routing::ReplyRouteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "mindbot")]
#[command(about = "MindBot stream adapter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the stream adapter: ingress server, intake loop, dedup sweeper.
    Run {
        /// Config file path (default: MINDBOT_CONFIG_PATH or ~/.mindbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Ingress port (default from config or 15250)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Check credentials and backend reachability without processing messages.
    TestConnection {
        /// Config file path (default: MINDBOT_CONFIG_PATH or ~/.mindbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("mindbot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config, port }) => {
            if let Err(e) = run(config, port).await {
                log::error!("run failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::TestConnection { config }) => {
            if let Err(e) = test_connection(config).await {
                log::error!("connection test failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn build_recognition(config: &Config) -> RecognitionPipeline {
    let mut providers: Vec<Arc<dyn RecognitionProvider>> = vec![Arc::new(NativeTranscriptProvider)];
    for (i, ep) in config.recognition.fallback_endpoints.iter().enumerate() {
        providers.push(Arc::new(TranscriptionApiProvider::new(
            format!("fallback-{}", i + 1),
            ep.base_url.clone(),
            ep.api_key.clone(),
            ep.model.clone(),
        )));
    }
    RecognitionPipeline::new(
        providers,
        Duration::from_secs(config.recognition.provider_timeout_secs),
    )
}

fn streaming_options(config: &Config) -> StreamingOptions {
    StreamingOptions {
        min_flush_chars: config.streaming.min_flush_chars,
        flush_debounce: Duration::from_millis(config.streaming.flush_debounce_ms),
        max_push_retries: config.streaming.max_push_retries,
        retry_delay: Duration::from_millis(config.streaming.retry_delay_ms),
        message_limit: config.limits.message_limit,
    }
}

async fn run(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (config, path) = config::load_config(config_path)?;
    log::info!("using config at {}", path.display());

    let dedup = Arc::new(DedupStore::new(
        Duration::from_secs(config.dedup.ttl_secs),
        config.dedup.capacity,
    ));
    let _sweeper = dedup.spawn_sweeper();

    let extractor = ContentExtractor::new(build_recognition(&config));

    let backend = Arc::new(DifyClient::new(
        config.backend.base_url.clone(),
        config::resolve_backend_api_key(&config),
        Duration::from_secs(config.backend.timeout_secs),
    ));

    let routes = Arc::new(ReplyRouteStore::new());
    let transport = Arc::new(WebhookCardTransport::new(
        Arc::clone(&routes),
        config.platform.card_template_id.clone(),
        Duration::from_secs(config.streaming.call_timeout_secs),
    ));

    let controller = Arc::new(IntakeController::new(
        dedup,
        extractor,
        backend,
        transport,
        config.limits.max_concurrent_backend_calls,
        streaming_options(&config),
        config.platform.enable_streaming,
    ));

    let (tx, rx) = mpsc::channel(64);
    let intake = tokio::spawn(run_intake_loop(rx, controller));

    let state = IngressState {
        deliveries: tx,
        routes,
    };
    let bind = config.platform.bind.clone();
    let ingress_port = port.unwrap_or(config.platform.port);

    tokio::select! {
        res = run_ingress(state, &bind, ingress_port) => res?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutting down");
        }
    }
    intake.abort();
    Ok(())
}

async fn test_connection(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = config::load_config(config_path)?;
    log::info!("using config at {}", path.display());

    let (client_id, client_secret) = config::resolve_platform_credentials(&config);
    if client_id.is_none() || client_secret.is_none() {
        log::warn!("platform credentials are not fully configured");
    } else {
        println!("platform credentials: configured");
    }

    let backend = DifyClient::new(
        config.backend.base_url.clone(),
        config::resolve_backend_api_key(&config),
        Duration::from_secs(30),
    );
    backend.ping().await?;
    println!("backend: reachable");
    Ok(())
}
