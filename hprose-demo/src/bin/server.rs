use clap::Parser;
use hprose::{Service, ServiceConfig, SocketService};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:4321")]
    pub addr: std::net::SocketAddr,

    /// Send call stacks of panics to clients.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Service config as JSON, e.g. '{"error_delay":"1s"}'.
    #[arg(long)]
    pub config: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(json) => match serde_json::from_str::<ServiceConfig>(json) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("invalid config: {e}");
                return;
            }
        },
        None => ServiceConfig::default(),
    };
    config.debug |= args.debug;

    let mut service = Service::new(config);
    hprose_demo::register(&mut service);
    let server = SocketService::new(service);
    let addr = match server.listen(args.addr).await {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("listen failed: {e}");
            return;
        }
    };
    tracing::info!(
        "Serving {:?} on {addr}...",
        server.service().registry().names()
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => server.stop(),
        () = server.join() => {}
    }
    server.join().await;
}
