use std::{path::PathBuf, process};

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info, warn};

use gbtr_ledger::{
    contracts::{GBtr, QueryResult},
    fixture::{self, FixtureItem},
    gateway::{ConnectionProfile, Contract, Gateway, GatewayError},
    logging::{self, LoggingFormat},
    wallet::{self, FileSystemWallet, WalletError, X509Identity},
};

const DEFAULT_CRED_PATH: &str = "../../test-network/organizations/peerOrganizations/org1.example.com/users/User1@org1.example.com/msp";

#[derive(Parser, Debug)]
#[command(name = "gbtr-app", version, about = "Client for the GBtr ledger contract")]
struct Cli {
    #[command(flatten)]
    config: ClientConfig,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LoggingFormat::Text, global = true)]
    log_format: LoggingFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Everything the client needs, resolved once at startup.
#[derive(Args, Debug, Clone)]
struct ClientConfig {
    /// Wallet directory.
    #[arg(long, default_value = "wallet")]
    wallet: PathBuf,
    /// Wallet label of the client identity.
    #[arg(long, default_value = "appUser")]
    label: String,
    /// MSP the identity belongs to when the wallet is populated.
    #[arg(long, default_value = "Org1MSP")]
    msp_id: String,
    /// MSP credential directory holding signcerts/ and keystore/.
    #[arg(long, default_value = DEFAULT_CRED_PATH)]
    cred_path: PathBuf,
    /// Connection profile (JSON).
    #[arg(long, default_value = "network/connection-org1.json")]
    profile: PathBuf,
    #[arg(long, default_value = "mychannel")]
    channel: String,
    #[arg(long, default_value = "fabcar")]
    contract: String,
    /// Local fixture of transactions to print.
    #[arg(long, default_value = "gbTransactions/gbTransactions.json")]
    fixture: PathBuf,
    /// Reach peers on 127.0.0.1 regardless of the host in the profile.
    #[arg(long, env = "DISCOVERY_AS_LOCALHOST", default_value_t = true, action = ArgAction::Set)]
    as_localhost: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the ledger, create GBTR22, read it back, list again, print the fixture.
    Demo,
    /// Seed the ledger with its placeholder record.
    Init,
    /// Create (or overwrite) a record.
    Create {
        key: String,
        obj_uit: String,
        obj_qty: String,
        tsender: String,
        tick: String,
        treceiver: String,
    },
    /// Read one record.
    Query { key: String },
    /// List every record on the ledger.
    QueryAll,
    /// Print the local fixture file.
    Fixture,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("Failed to open wallet: {0}")]
    Wallet(#[source] WalletError),
    #[error("Failed to populate wallet contents: {0}")]
    Populate(#[source] WalletError),
    #[error("Failed to load connection profile: {0}")]
    Profile(#[source] GatewayError),
    #[error("Failed to connect to gateway: {0}")]
    Connect(#[source] GatewayError),
    #[error("Failed to submit transaction: {0}")]
    Submit(#[source] GatewayError),
    #[error("Failed to evaluate transaction: {0}")]
    Evaluate(#[source] GatewayError),
    #[error("Failed to decode {function} result: {source}")]
    Decode {
        function: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn bootstrap_identity(config: &ClientConfig) -> Result<X509Identity, AppError> {
    let wallet = FileSystemWallet::open(&config.wallet).map_err(AppError::Wallet)?;
    if wallet.exists(&config.label) {
        return wallet.get(&config.label).map_err(AppError::Wallet);
    }
    wallet::populate_wallet(&wallet, &config.label, &config.msp_id, &config.cred_path)
        .map_err(AppError::Populate)
}

fn submit(contract: &Contract<'_>, function: &str, args: &[&str]) -> Result<Vec<u8>, AppError> {
    contract
        .submit_transaction(function, args)
        .map_err(AppError::Submit)
}

fn evaluate(contract: &Contract<'_>, function: &str, args: &[&str]) -> Result<Vec<u8>, AppError> {
    contract
        .evaluate_transaction(function, args)
        .map_err(AppError::Evaluate)
}

fn print_record(gbtr: &GBtr) {
    println!("OBJ_UIT: {}", gbtr.obj_uit);
    println!("OBJ_QTY: {}", gbtr.obj_qty);
    println!("TSENDER: {}", gbtr.tsender);
    println!("TICK: {}", gbtr.tick);
    println!("TRECEIVER: {}", gbtr.treceiver);
}

fn query(contract: &Contract<'_>, key: &str) -> Result<(), AppError> {
    let result = evaluate(contract, "queryGBtr", &[key])?;
    println!("{}", String::from_utf8_lossy(&result));
    let gbtr: GBtr = serde_json::from_slice(&result).map_err(|source| AppError::Decode {
        function: "queryGBtr",
        source,
    })?;
    print_record(&gbtr);
    Ok(())
}

fn query_all(contract: &Contract<'_>) -> Result<(), AppError> {
    let result = evaluate(contract, "queryAllGBtrs", &[])?;
    println!("{}", String::from_utf8_lossy(&result));
    let all: Vec<QueryResult> =
        serde_json::from_slice(&result).map_err(|source| AppError::Decode {
            function: "queryAllGBtrs",
            source,
        })?;
    info!(records = all.len(), "listed ledger");
    Ok(())
}

fn print_fixture_item(item: &FixtureItem) {
    println!("OBJ_UIT: {}", item.obj_uit);
    println!("OBJ_QTY: {}", item.obj_qty);
    println!("TSENDER: {}", item.tsender);
    println!("TICK: {}", item.tick);
    println!("OBJECT: {}", item.object);
    println!("TRECEIVER: {}", item.treceiver);
}

/// Fixture problems are reported and otherwise ignored.
fn print_fixture(config: &ClientConfig) {
    info!(path = %config.fixture.display(), "loading fixture");
    let (data, file) = match fixture::load_fixture(&config.fixture) {
        Ok(loaded) => loaded,
        Err(err) => {
            warn!(%err, "fixture not loaded");
            return;
        }
    };
    println!("{}", String::from_utf8_lossy(&data));
    println!("N. of elements: {}", file.items.len());
    for item in &file.items {
        print_fixture_item(item);
    }
    if let Err(err) = file.records() {
        warn!(%err, "fixture does not map onto contract records");
    }
}

fn demo(contract: &Contract<'_>, config: &ClientConfig) -> Result<(), AppError> {
    println!("All Transactions on the ledger:");
    query_all(contract)?;

    println!("Creating new Transactions:");
    let result = submit(
        contract,
        "createGBtr",
        &["GBTR22", "KW", "66", "FMV", "10", "Market"],
    )?;
    println!("{}", String::from_utf8_lossy(&result));

    println!("Evaluating Transactions:");
    query(contract, "GBTR22")?;

    println!("All Transactions on the ledger:");
    query_all(contract)?;

    print_fixture(config);
    Ok(())
}

fn run(command: &Command, config: &ClientConfig) -> Result<(), AppError> {
    if let Command::Fixture = command {
        print_fixture(config);
        return Ok(());
    }

    let identity = bootstrap_identity(config)?;
    let profile = ConnectionProfile::from_file(&config.profile).map_err(AppError::Profile)?;
    let gateway =
        Gateway::connect(&profile, identity, config.as_localhost).map_err(AppError::Connect)?;
    let network = gateway.network(&config.channel);
    let contract = network.contract(&config.contract);

    let outcome = match command {
        Command::Demo => demo(&contract, config),
        Command::Init => submit(&contract, "initLedger", &[]).map(|_| ()),
        Command::Create {
            key,
            obj_uit,
            obj_qty,
            tsender,
            tick,
            treceiver,
        } => submit(
            &contract,
            "createGBtr",
            &[
                key.as_str(),
                obj_uit.as_str(),
                obj_qty.as_str(),
                tsender.as_str(),
                tick.as_str(),
                treceiver.as_str(),
            ],
        )
        .map(|_| ()),
        Command::Query { key } => query(&contract, key),
        Command::QueryAll => query_all(&contract),
        Command::Fixture => Ok(()),
    };

    if let Err(err) = gateway.close() {
        warn!(%err, "gateway did not close cleanly");
    }
    outcome
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.log_format) {
        eprintln!("{err}");
    }

    let command = cli.command.unwrap_or(Command::Demo);
    if let Err(err) = run(&command, &cli.config) {
        error!(%err, "gbtr-app failed");
        eprintln!("{err}");
        process::exit(1);
    }
}
