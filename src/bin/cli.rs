use std::net::SocketAddr;
use std::process::exit;

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};

use bitkv::{config::DEFAULT_ADDR, KvsClient, KvsError, Result};

/// Args for bitkv-client
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct ClientArgs {
    /// Subcommand
    #[clap(subcommand)]
    command: Commands,
}

/// Enum type of subcommand for bitkv-client
#[derive(Debug, Subcommand)]
enum Commands {
    /// Read the value of a given key
    Read {
        /// Key
        key: String,
        /// Server address, default is 127.0.0.1:9999
        #[clap(short, long, value_parser)]
        addr: Option<SocketAddr>,
    },
    /// Set the value of a given key
    Put {
        /// Key
        key: String,
        /// Value
        value: String,
        /// Server address, default is 127.0.0.1:9999
        #[clap(short, long, value_parser)]
        addr: Option<SocketAddr>,
    },
    /// Delete a given key
    Delete {
        /// Key
        key: String,
        /// Server address, default is 127.0.0.1:9999
        #[clap(short, long, value_parser)]
        addr: Option<SocketAddr>,
    },
    /// List every (key, value) pair with a key in the inclusive range [start, end]
    Readrange {
        /// Start of the range
        start: String,
        /// End of the range
        end: String,
        /// Server address, default is 127.0.0.1:9999
        #[clap(short, long, value_parser)]
        addr: Option<SocketAddr>,
    },
    /// Put several key/value pairs in one batch; each item is `key=value`
    Batchput {
        /// Items formatted as key=value
        #[clap(required = true)]
        items: Vec<String>,
        /// Server address, default is 127.0.0.1:9999
        #[clap(short, long, value_parser)]
        addr: Option<SocketAddr>,
    },
    /// Ask the server to stop accepting connections
    Shutdown {
        /// Server address, default is 127.0.0.1:9999
        #[clap(short, long, value_parser)]
        addr: Option<SocketAddr>,
    },
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{}", e);
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = ClientArgs::parse();

    match cli.command {
        Commands::Read { key, addr } => {
            let mut client = KvsClient::connect(resolve(addr))?;
            match client.read(&key)? {
                Some(value) => println!("{}", value),
                None => println!("Key not found"),
            }
        }

        Commands::Put { key, value, addr } => {
            let mut client = KvsClient::connect(resolve(addr))?;
            client.put(&key, &value)?;
        }

        Commands::Delete { key, addr } => {
            let mut client = KvsClient::connect(resolve(addr))?;
            client.delete(&key)?;
        }

        Commands::Readrange { start, end, addr } => {
            let mut client = KvsClient::connect(resolve(addr))?;
            for (key, value) in client.read_range(&start, &end)? {
                println!("{}\t{}", key, value);
            }
        }

        Commands::Batchput { items, addr } => {
            let mut pairs = Vec::with_capacity(items.len());
            for item in &items {
                let (key, value) = item.split_once('=').ok_or_else(|| {
                    KvsError::BadRequest(format!("batch item {:?} must be key=value", item))
                })?;
                pairs.push((key.to_string(), value.to_string()));
            }
            let mut client = KvsClient::connect(resolve(addr))?;
            client.batch_put(&pairs)?;
        }

        Commands::Shutdown { addr } => {
            let mut client = KvsClient::connect(resolve(addr))?;
            client.shutdown()?;
        }
    }

    Ok(())
}

fn resolve(addr: Option<SocketAddr>) -> SocketAddr {
    addr.unwrap_or_else(|| DEFAULT_ADDR.parse().unwrap())
}
