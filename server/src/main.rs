use clap::Parser;
use server::config::{Args, ServerConfig};
use server::network::Server;

/// Parses command-line arguments, binds the listener and runs the lobby
/// server until the process is stopped.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    let mut server = Server::bind(&config).await?;
    server.run().await?;

    Ok(())
}
