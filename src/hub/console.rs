//! Admin console for a running hub.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::Hub;

/// Read admin commands from stdin until `quit` or EOF. `list` prints the
/// registered identities with their relay auth flag, `relay` prints the
/// active relay pairs.
pub async fn run_console(hub: Hub) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "list" => {
                let peers = hub.peers();
                if peers.is_empty() {
                    println!("no connected peers");
                }
                for (id, authenticated) in peers {
                    println!("{:<24} relay_auth={}", id, authenticated);
                }
            }
            "relay" => {
                let pairs = hub.relay_pairs();
                if pairs.is_empty() {
                    println!("no active relay pairs");
                }
                for (a, b) in pairs {
                    println!("{} <-> {}", a, b);
                }
            }
            "quit" => break,
            other => println!("unknown command: {} (try: list, relay, quit)", other),
        }
    }
    Ok(())
}
