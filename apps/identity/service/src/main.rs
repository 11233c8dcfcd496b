use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use identity_profile_service::config::Config;

#[derive(Parser)]
#[command(name = "identity-profile-service")]
#[command(about = "Profile management and scope-gated access for identity records")]
struct Cli {
    /// Overrides IDS_BIND_ADDR.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,
    /// Overrides IDS_SCOPE_TABLE_PATH.
    #[arg(long)]
    scope_table: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(scope_table) = cli.scope_table {
        config.scope_table_path = Some(scope_table);
    }

    identity_profile_service::init_tracing(&config);
    identity_profile_service::serve(config).await
}
