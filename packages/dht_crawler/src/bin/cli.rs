//! A line-oriented REPL for exchanging raw KRPC messages with individual
//! peers, independent of the routing table or lookup engine. Mirrors the
//! command set of the diagnostic client this workspace's protocol was
//! modeled on: connect to a peer under a short name, then `ping`/`find`/
//! `get` it and inspect the raw response.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use krpc_encoding::NodeID;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio_krpc::{KRPCNode, SendTransport};
use tracing_subscriber::EnvFilter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const HELP: &str = "\
distance <id1> <id2>        show the XOR distance between two ids
connect <name> <host> <port> open a connection to host:port named <name>
ping <name>                 send a ping to <name>
find <name> <id>            send a find_node about id to <name>
get <name> <infohash>       send a get_peers about infohash to <name>
list                        list open connections
info                        show this node's id
exit                        exit the program
help                        show this help
";

struct Cli {
    local_id: NodeID,
    transport: SendTransport,
    connections: HashMap<String, SocketAddr>,
}

impl Cli {
    async fn new() -> Result<Cli, Box<dyn std::error::Error>> {
        let node = KRPCNode::bind("0.0.0.0:0".parse()?).await?;
        let (transport, _requests, _unmatched) = node.serve();
        Ok(Cli {
            local_id: NodeID::generate(),
            transport,
            connections: HashMap::new(),
        })
    }

    fn connect(&mut self, name: &str, host: &str, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| format!("could not resolve {host}:{port}"))?;
        println!("connect to {addr}");
        self.connections.insert(name.to_string(), addr);
        self.list();
        Ok(())
    }

    fn list(&self) {
        for (i, (name, addr)) in self.connections.iter().enumerate() {
            println!("{}. {} -> {}", i + 1, name, addr);
        }
    }

    fn resolve(&self, name: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        self.connections
            .get(name)
            .copied()
            .ok_or_else(|| format!("no connection named {name}").into())
    }

    async fn ping(&self, name: &str) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.resolve(name)?;
        let response = self.transport.ping(addr, self.local_id, REQUEST_TIMEOUT).await?;
        println!("pong from {}", response.id);
        Ok(())
    }

    async fn find(&self, name: &str, target: NodeID) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.resolve(name)?;
        let response = self
            .transport
            .find_node(addr, self.local_id, target, REQUEST_TIMEOUT)
            .await?;
        println!("{} nodes received", response.nodes.len());
        for (i, info) in response.nodes.iter().enumerate() {
            println!(
                "{} {}, distance to target={}, distance to local={}",
                i,
                info,
                target.distance(&info.id).leading_zero_bits(),
                self.local_id.distance(&info.id).leading_zero_bits(),
            );
        }
        Ok(())
    }

    async fn get(&self, name: &str, info_hash: NodeID) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.resolve(name)?;
        let response = self
            .transport
            .get_peers(addr, self.local_id, info_hash, REQUEST_TIMEOUT)
            .await?;
        match response.result {
            krpc_encoding::PeersOrNodes::Peers(peers) => {
                println!("{} peers received", peers.len());
                for (i, peer) in peers.iter().enumerate() {
                    println!("{i} {peer}");
                }
            }
            krpc_encoding::PeersOrNodes::Nodes(nodes) => {
                println!("{} nodes received", nodes.len());
                for (i, info) in nodes.iter().enumerate() {
                    println!("{i} {info}");
                }
            }
        }
        Ok(())
    }
}

async fn eval(cli: &mut Cli, line: &str) -> Result<(), Box<dyn std::error::Error>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["distance", a, b] => {
            let a = NodeID::from_hex(a)?;
            let b = NodeID::from_hex(b)?;
            println!("{}", a.distance(&b).leading_zero_bits());
        }
        ["connect", name, host, port] => cli.connect(name, host, port.parse()?)?,
        ["ping", name] => cli.ping(name).await?,
        ["find", name, target] => cli.find(name, NodeID::from_hex(target)?).await?,
        ["get", name, info_hash] => cli.get(name, NodeID::from_hex(info_hash)?).await?,
        ["list"] => cli.list(),
        ["info"] => println!("local node id: {}", cli.local_id),
        ["help"] => println!("{HELP}"),
        [] => {}
        _ => println!("unrecognized command, type 'help' for usage"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut cli = Cli::new().await?;
    println!("dht_cli, type 'help' to show the help page");
    println!("local node id: {}", cli.local_id);

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline(">>> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                if line.trim() == "exit" {
                    println!("bye");
                    break;
                }
                if let Err(err) = eval(&mut cli, &line).await {
                    eprintln!("error: {err}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("bye");
                break;
            }
            Err(err) => {
                eprintln!("readline error: {err}");
                break;
            }
        }
    }

    Ok(())
}
