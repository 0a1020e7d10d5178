//! tcp-relay - TCP relay with optional HTTP CONNECT proxy egress.

use clap::Parser;
use tcp_relay::server::{shutdown_signal, RelayConfig, RelayServer};
use tcp_relay::{logging, Cli};

fn main() {
    let cli = Cli::parse();

    logging::init(&cli.log_level);
    cli.print_startup();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.threads)
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    let config = RelayConfig::from(&cli);
    let result = runtime.block_on(async move {
        let server = RelayServer::bind(config).await?;
        tracing::info!("listening on {}", server.local_addr()?);

        tokio::select! {
            result = server.run() => result,
            _ = shutdown_signal() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    });

    if let Err(err) = result {
        tracing::error!("fatal: {err}");
        drop(runtime);
        std::process::exit(1);
    }
}
