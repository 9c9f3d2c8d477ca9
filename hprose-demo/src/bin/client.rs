use clap::Parser;
use hprose::io::Value;
use hprose_demo::Client;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:4321")]
    pub addr: std::net::SocketAddr,

    /// Function to call.
    #[arg(short, long, default_value = "greet")]
    pub method: String,

    /// String arguments; integers are sent as integers.
    #[arg(short, long, default_value = "alice")]
    pub value: Vec<String>,

    /// Tag frames with request ids.
    #[arg(long, default_value_t = false)]
    pub full_duplex: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let values: Vec<Value> = args
        .value
        .iter()
        .map(|v| v.parse::<i64>().map_or_else(|_| v.as_str().into(), Value::from))
        .collect();

    let mut client = match Client::connect(args.addr, args.full_duplex).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("connect failed: {e}");
            return;
        }
    };
    let rsp = client.invoke(&args.method, &values).await;
    tracing::info!("{} rsp: {:?}", args.method, rsp);
}
