//! Gateway CLI entry point.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use underpass_gateway::{Gateway, GatewayConfig, VERSION};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "underpass-gateway")]
#[command(version = VERSION)]
#[command(about = "VLESS-over-WebSocket and H2 tunnel gateway")]
struct Args {
    /// Print the resolved configuration and exit without starting the server.
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .max_blocking_threads(32)
        .enable_all()
        .event_interval(61)
        .global_queue_interval(31)
        .thread_name("gateway-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = GatewayConfig::from_env().map_err(|e| {
        eprintln!("configuration error: {e}");
        e
    })?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if args.test {
        println!("configuration OK: listening on port {}", config.port);
        return Ok(());
    }

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("failed to initialize gateway: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.run().await {
        error!("gateway error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
