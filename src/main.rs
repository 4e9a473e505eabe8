use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use peerlink::client::NoDirectTransport;
use peerlink::config::load_env_file;
use peerlink::{ClientConfig, ClientEvent, Hub, HubConfig, PeerClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(about = "Signaling hub and relay data plane for peer-to-peer messaging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the signaling hub
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
        /// Env file providing RELAY_PASSWORD (relay stays disabled without it)
        #[arg(long)]
        env_file: Option<PathBuf>,
        /// Skip the admin console (for non-interactive runs)
        #[arg(long)]
        no_console: bool,
    },
    /// Run the sample relay client
    Client {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Requested identity (the hub assigns one when omitted)
        #[arg(long)]
        id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            addr,
            env_file,
            no_console,
        } => serve(addr, env_file, no_console).await,
        Commands::Client { url, id } => run_client(url, id).await,
    }
}

async fn serve(addr: String, env_file: Option<PathBuf>, no_console: bool) -> Result<()> {
    if let Some(path) = env_file {
        let loaded = load_env_file(&path)?;
        println!("Loaded {} variables from {}", loaded, path.display());
    }

    let config = HubConfig::from_env().with_bind_address(addr);
    let hub = Hub::new(config);

    println!("Signaling hub on {}", hub.bind_address());
    if hub.relay_enabled() {
        println!("Relay: enabled");
    } else {
        println!("Relay: disabled (set RELAY_PASSWORD to enable)");
    }

    if no_console {
        return hub.run().await;
    }

    // Bind before entering the console so startup failures exit nonzero.
    hub.start().await?;
    println!("Admin console: list, relay, quit");
    peerlink::hub::run_console(hub).await
}

async fn run_client(url: String, id: Option<String>) -> Result<()> {
    let mut config = ClientConfig::new(url);
    config.peer_id = id;

    // The sample client exercises the relay path; direct channels need an
    // external peer-transport implementation.
    let (client, mut events) = PeerClient::connect(config, Arc::new(NoDirectTransport)).await?;

    println!("commands: list | auth <password> | connect <peer> | leave <peer>");
    println!("          send <peer> <text> | broadcast <text> | quit");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                let mut parts = line.splitn(3, ' ');
                match (parts.next().unwrap_or(""), parts.next(), parts.next()) {
                    ("", _, _) => {}
                    ("list", _, _) => client.request_peer_list(),
                    ("auth", Some(password), _) => client.authenticate_relay(password),
                    ("connect", Some(peer), _) => client.connect_to_peer_via_relay(peer),
                    ("leave", Some(peer), _) => client.disconnect_from_peer_via_relay(peer),
                    ("send", Some(peer), Some(text)) => client.send_text_via_relay(peer, text),
                    ("broadcast", Some(text), rest) => {
                        let text = match rest {
                            Some(rest) => format!("{text} {rest}"),
                            None => text.to_string(),
                        };
                        client.broadcast_text_via_relay(text);
                    }
                    ("quit", _, _) => {
                        client.shutdown();
                        break;
                    }
                    (other, _, _) => println!("unknown command: {other}"),
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(event);
            }
        }
    }
    Ok(())
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::Connected { identity } => println!("* registered as {identity}"),
        ClientEvent::Disconnected => println!("* disconnected"),
        ClientEvent::StateChanged(state) => println!("* connection {state}"),
        ClientEvent::PeerList(peers) => println!("* online peers: {peers:?}"),
        ClientEvent::PeerConnected(id) => println!("* direct channel open with {id}"),
        ClientEvent::PeerDisconnected(id) => println!("* direct channel closed with {id}"),
        ClientEvent::TextMessage { from, text } => println!("[{from}] {text}"),
        ClientEvent::BinaryMessage { from, data } => {
            println!("[{from}] {} bytes of binary data", data.len())
        }
        ClientEvent::RelayAuthenticated => println!("* relay authentication granted"),
        ClientEvent::RelayAuthFailed { message } => println!("* relay auth failed: {message}"),
        ClientEvent::RelayConnected(id) => println!("* relay connected to {id}"),
        ClientEvent::RelayDisconnected(id) => println!("* relay disconnected from {id}"),
        ClientEvent::RelayText { from, text } => println!("[relay:{from}] {text}"),
        ClientEvent::RelayBinary { from, data } => {
            println!("[relay:{from}] {} bytes of binary data", data.len())
        }
        ClientEvent::SignalingError(message) => println!("! hub error: {message}"),
        ClientEvent::Error(e) => println!("! {e}"),
    }
}
