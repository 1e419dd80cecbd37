use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "archive-cli")]
#[command(about = "CLI client for the archive node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show maintainer state, chain height and pending records
    Status,
    /// Print the local chain segment
    Blocks,
    /// Create a new chain for the given peers
    Bootstrap {
        /// Peer as `id=address`, repeatable
        #[arg(long = "peer", required = true, value_parser = parse_peer)]
        peers: Vec<Peer>,
    },
    /// Start the seal loop on the node
    Start {
        #[arg(long = "peer", required = true, value_parser = parse_peer)]
        peers: Vec<Peer>,
    },
    /// Stop the seal loop
    Stop,
    /// Queue a record for the next block
    Add {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "text/html")]
        content_type: String,
        /// Page payload, usually base64
        #[arg(long, default_value = "")]
        page: String,
        /// Extra URLs captured with the page
        #[arg(long = "also")]
        additional_urls: Vec<String>,
    },
    /// Look up archived records by url
    Query {
        #[arg(long = "peer", required = true, value_parser = parse_peer)]
        peers: Vec<Peer>,
        #[arg(long)]
        url: String,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
struct Peer {
    id: String,
    address: String,
}

fn parse_peer(s: &str) -> Result<Peer, String> {
    match s.split_once('=') {
        Some((id, address)) if !id.is_empty() && !address.is_empty() => Ok(Peer {
            id: id.to_string(),
            address: address.to_string(),
        }),
        _ => Err(format!("expected `id=address`, got `{s}`")),
    }
}

fn roster(peers: Vec<Peer>) -> Value {
    json!({ "participants": peers })
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

async fn send(req: reqwest::RequestBuilder) -> Result<()> {
    let res = req.send().await.context("contacting node")?;
    let status = res.status();
    let body = res.text().await?;
    debug!(%status, "node replied");
    let pretty = serde_json::from_str::<Value>(&body)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or(body);
    println!("{pretty}");
    if !status.is_success() {
        bail!("node returned {status}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = reqwest::Client::new();
    let req = match cli.cmd {
        Command::Status => client.get(format!("{node}/chain")),
        Command::Blocks => client.get(format!("{node}/chain/blocks")),
        Command::Bootstrap { peers } => client
            .post(format!("{node}/chain/bootstrap"))
            .json(&json!({ "roster": roster(peers) })),
        Command::Start { peers } => client
            .post(format!("{node}/chain/start"))
            .json(&json!({ "roster": roster(peers) })),
        Command::Stop => client.post(format!("{node}/chain/stop")),
        Command::Add {
            url,
            content_type,
            page,
            additional_urls,
        } => client.post(format!("{node}/records")).json(&json!({
            "records": [{
                "url": url,
                "content_type": content_type,
                "page": page,
                "additional_urls": additional_urls,
                "timestamp": now_secs(),
            }]
        })),
        Command::Query { peers, url } => client
            .post(format!("{node}/records/query"))
            .json(&json!({
                "roster": roster(peers),
                "selector": { "by": "url", "url": url },
            })),
    };
    send(req).await
}
