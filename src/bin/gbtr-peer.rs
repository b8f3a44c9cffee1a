use std::{net::TcpListener, path::PathBuf, process};

use clap::Parser;
use tracing::{error, info};

use gbtr_ledger::{
    contracts::GBtrContract,
    gateway::Peer,
    ledger::{FileState, MemoryState, WorldState},
    logging::{self, LoggingFormat},
};

#[derive(Parser, Debug)]
#[command(name = "gbtr-peer", version, about = "Serves the GBtr contract to gateway clients")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:7051")]
    bind: String,
    /// Channel served by this peer.
    #[arg(long, default_value = "mychannel")]
    channel: String,
    /// Name the contract is deployed under.
    #[arg(long, default_value = "fabcar")]
    contract: String,
    /// World-state snapshot file; state is kept in memory when omitted.
    #[arg(long)]
    state: Option<PathBuf>,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LoggingFormat::Text)]
    log_format: LoggingFormat,
}

fn fail(context: &str, err: &dyn std::fmt::Display) -> ! {
    error!(%err, "{context}");
    eprintln!("{context}: {err}");
    process::exit(1)
}

fn serve<S: WorldState>(cli: &Cli, listener: &TcpListener, state: S) {
    let mut peer = Peer::new(&cli.channel, GBtrContract::new(&cli.contract), state);
    info!(bind = %cli.bind, channel = %cli.channel, contract = %cli.contract, "peer listening");
    if let Err(err) = peer.serve(listener, None) {
        fail("peer stopped", &err);
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.log_format) {
        eprintln!("{err}");
    }

    let listener = match TcpListener::bind(&cli.bind) {
        Ok(listener) => listener,
        Err(err) => fail(&format!("failed to bind {}", cli.bind), &err),
    };

    match &cli.state {
        Some(path) => match FileState::open(path) {
            Ok(state) => serve(&cli, &listener, state),
            Err(err) => fail("failed to open world state", &err),
        },
        None => serve(&cli, &listener, MemoryState::new()),
    }
}
