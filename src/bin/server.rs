use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::{error, info, LevelFilter};

use bitkv::{
    config::{DEFAULT_ADDR, DEFAULT_DATA_PATH, DEFAULT_THRESHOLD},
    thread_pool::{RayonThreadPool, ThreadPool},
    Engine, Result, Server,
};

/// Args for bitkv-server
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct ServerArgs {
    /// Address to listen on, default is 127.0.0.1:9999
    #[clap(long, value_parser)]
    addr: Option<SocketAddr>,
    /// Path of the data file, default is store.dat
    #[clap(long, value_parser)]
    data: Option<PathBuf>,
    /// Compaction threshold (deleted_size / data_size), default is 0.5
    #[clap(long, value_parser)]
    threshold: Option<f64>,
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{}", e);
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = ServerArgs::parse();

    let addr = cli.addr.unwrap_or_else(|| DEFAULT_ADDR.parse().unwrap());
    let data_path = cli.data.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));
    let threshold = cli.threshold.unwrap_or(DEFAULT_THRESHOLD);

    info!("bitkv-server {}", env!("CARGO_PKG_VERSION"));
    info!("data file: {:?}", data_path);
    info!("compaction threshold: {}", threshold);

    let engine = Engine::open(data_path, threshold)?;
    let pool = RayonThreadPool::new(num_cpus::get())?;
    let server = Server::new(engine, pool);
    server.run(addr)
}
