//! Agora gateway entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use agora_config::{ConfigLoader, DEFAULT_ENV_PREFIX};
use agora_core::SystemClock;
use agora_server::settings::telemetry_config;
use agora_server::{Gateway, Ports, ShutdownSignal};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Config file read when neither `--config` nor `AGORA_CONFIG` is given.
const DEFAULT_CONFIG_FILE: &str = "agora.toml";

struct Args {
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("agora-gateway {VERSION}");
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Agora gateway - social backend HTTP front door

USAGE:
    agora-gateway [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    AGORA_CONFIG                          Configuration file when --config is absent
    AGORA__SERVER__HTTP_ADDR              Listen address (default: 0.0.0.0:8080)
    AGORA__AUTH__SECRET                   Credential signing secret (required)
    AGORA__SERVICES__USERS_URL            Users service base URL
    AGORA__SERVICES__MEDIA_URL            Media service base URL
    AGORA__DATABASE__URL                  SQLite URL (default: sqlite://agora.db)
    AGORA__TELEMETRY__LOGGING__LEVEL      Log level (default: info)
    AGORA__TELEMETRY__METRICS__ADDR       Metrics listen address

EXAMPLES:
    agora-gateway --config /etc/agora/gateway.toml
    AGORA__AUTH__SECRET=... agora-gateway
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_production();
    loader = match args.config.or_else(|| std::env::var_os("AGORA_CONFIG").map(PathBuf::from)) {
        Some(path) => loader
            .with_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE)?,
    };
    let config = loader
        .with_dotenv()
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    agora_telemetry::init_telemetry(&telemetry_config(&config)).context("initializing telemetry")?;

    info!(version = VERSION, addr = %config.server.http_addr, "starting agora gateway");
    info!(
        users = %config.services.users_url,
        media = %config.services.media_url,
        "downstream services"
    );

    let ports = Ports::http(&config)?;
    let gateway = Gateway::new(&config, ports, Arc::new(SystemClock)).await?;
    gateway.run(ShutdownSignal::with_os_signals()).await?;

    info!("agora gateway stopped");
    Ok(())
}
