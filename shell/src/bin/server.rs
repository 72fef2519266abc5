use clap::Parser;
use clap_derive::Parser;
use shell::EchoShellHandler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::select;
use tokio::sync::watch;
use tracing::{info, Level};
use transport::config::RudpConfig;
use transport::server_endpoint::ServerEndpoint;

#[derive(Parser)]
struct Args {
    /// address to listen on, e.g. 0.0.0.0:9999
    #[clap(default_value = "0.0.0.0:9999")]
    bind_address: String,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let bind_address: SocketAddr = args.bind_address.parse()?;
    let config = Arc::new(RudpConfig::default());
    let server = ServerEndpoint::bind(bind_address, Arc::new(EchoShellHandler), config).await?;
    info!("shell server listening on {}", server.local_addr()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    select! {
        _ = server.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted - shutting down");
            let _ = shutdown_tx.send(true);
        }
    }
    Ok(())
}
