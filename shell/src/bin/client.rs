use clap::Parser;
use clap_derive::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};
use transport::client_endpoint::ClientEndpoint;
use transport::config::RudpConfig;

#[derive(Parser)]
struct Args {
    /// address of the shell server, e.g. 127.0.0.1:9999
    #[clap(default_value = "127.0.0.1:9999")]
    server_address: String,

    /// size in bytes of the generated payload for the bulk transfer benchmark
    #[clap(long, default_value_t = 100_000)]
    file_size: usize,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let server_address: SocketAddr = args.server_address.parse()?;
    let config = Arc::new(RudpConfig::default());

    let mut client = ClientEndpoint::connect(server_address, config).await?;
    info!("connected as session {}", client.session_id());

    for command in ["ls -l", "whoami", "uname -a"] {
        let result = client.send_command(command).await?;
        println!("{}", String::from_utf8_lossy(&result.output));
        info!("command {:?} took {:?}", command, result.elapsed);
    }

    let content = vec![b'x'; args.file_size];
    let transfer = client.send_file(&content).await?;
    info!("transferred {} bytes in {:?} ({:.0} bytes/s)",
        transfer.file_size, transfer.elapsed, transfer.bytes_per_second);

    let stats = client.stats();
    info!("connect time: {:?}", stats.connect_time);
    info!("bytes sent: {}, bytes received: {}", stats.bytes_sent, stats.bytes_received);

    client.disconnect().await?;
    Ok(())
}
