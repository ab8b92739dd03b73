use std::path::{Path, PathBuf};

use clap::Parser;
use leastmta::LeastMta;
use leastmta_common::{config::MtaConfig, internal, logging};

/// Relays every authenticated submission straight to the recipient's MX.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (RON)
    #[arg(short, long, env = "LEASTMTA_CONFIG")]
    config: Option<PathBuf>,

    /// Server identity, used in the banner and the outbound greeting
    #[arg(short, long)]
    domain: Option<String>,

    /// Port to accept submissions on
    #[arg(short, long)]
    port: Option<u16>,
}

const DEFAULT_PATHS: [&str; 2] = [
    "./leastmta.config.ron",
    "/etc/leastmta/leastmta.config.ron",
];

/// Find the configuration file using the following precedence:
/// 1. `--config` or the `LEASTMTA_CONFIG` environment variable
/// 2. ./leastmta.config.ron (current working directory)
/// 3. /etc/leastmta/leastmta.config.ron (system-wide config)
///
/// Built-in defaults are used when none of these exist.
fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        anyhow::bail!("Configuration file {} does not exist", path.display());
    }

    Ok(DEFAULT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}

fn load_config(cli: &Cli) -> anyhow::Result<MtaConfig> {
    let mut config = match find_config_file(cli.config.as_deref())? {
        Some(path) => {
            internal!(level = INFO, "Loading configuration from {}", path.display());
            MtaConfig::from_file(&path)?
        }
        None => {
            internal!(level = INFO, "No configuration file found, using defaults");
            MtaConfig::default()
        }
    };

    if let Some(domain) = cli.domain.as_deref() {
        config.set_domain(domain);
    }

    if let Some(port) = cli.port {
        config.listen.set_port(port);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = load_config(&cli)?;

    LeastMta::from_config(config)?.run().await
}
