use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    ledger::{LedgerError, StateQueryIterator, WorldState},
    wallet::SerializedIdentity,
};

/// Prefix of the keys written by [`GBtrContract::init_ledger`].
pub const SEED_KEY_PREFIX: &str = "GBTR";

pub const INIT_LEDGER: &str = "InitLedger";
pub const CREATE_GBTR: &str = "CreateGBtr";
pub const QUERY_GBTR: &str = "QueryGBtr";
pub const QUERY_ALL_GBTRS: &str = "QueryAllGBtrs";

/// GB-Flex transaction record, stored as JSON in the world state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GBtr {
    pub obj_uit: String,
    pub obj_qty: f32,
    #[serde(rename = "sender")]
    pub tsender: String,
    pub tick: i64,
    pub treceiver: String,
}

impl GBtr {
    pub fn new(
        obj_uit: impl Into<String>,
        obj_qty: f32,
        tsender: impl Into<String>,
        tick: i64,
        treceiver: impl Into<String>,
    ) -> Self {
        Self {
            obj_uit: obj_uit.into(),
            obj_qty,
            tsender: tsender.into(),
            tick,
            treceiver: treceiver.into(),
        }
    }

    fn placeholder() -> Self {
        Self::new("init", 0.0, "init", 0, "init")
    }
}

/// One entry of a full-ledger listing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Record")]
    pub record: GBtr,
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("failed to read from world state: {0}")]
    Read(#[source] LedgerError),
    #[error("failed to put to world state: {0}")]
    Write(#[source] LedgerError),
    #[error("{key} does not exist")]
    NotFound { key: String },
    #[error("record at {key} is corrupt: {source}")]
    CorruptRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("function {0} not found in contract")]
    UnknownFunction(String),
    #[error("{function} expects {expected} arguments, received {received}")]
    ArgumentCount {
        function: &'static str,
        expected: usize,
        received: usize,
    },
    #[error("invalid value {value:?} for parameter {param}: {reason}")]
    InvalidArgument {
        param: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Everything an entry point sees of the transaction it runs in.
pub struct TransactionContext<'a> {
    tx_id: String,
    channel: String,
    creator: SerializedIdentity,
    stub: &'a mut dyn WorldState,
}

impl<'a> TransactionContext<'a> {
    pub fn new(
        tx_id: impl Into<String>,
        channel: impl Into<String>,
        creator: SerializedIdentity,
        stub: &'a mut dyn WorldState,
    ) -> Self {
        Self {
            tx_id: tx_id.into(),
            channel: channel.into(),
            creator,
            stub,
        }
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn creator(&self) -> &SerializedIdentity {
        &self.creator
    }

    pub fn stub(&mut self) -> &mut dyn WorldState {
        &mut *self.stub
    }
}

/// Contract hosted by a peer and invoked by function name.
pub trait Chaincode {
    fn name(&self) -> &str;

    fn invoke(
        &self,
        ctx: &mut TransactionContext<'_>,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>, ContractError>;
}

pub struct GBtrContract {
    name: String,
}

impl GBtrContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Seeds the world state with placeholder records under `GBTR<i>`.
    pub fn init_ledger(&self, ctx: &mut TransactionContext<'_>) -> Result<(), ContractError> {
        let seeds = [GBtr::placeholder()];
        for (i, gbtr) in seeds.iter().enumerate() {
            let key = format!("{SEED_KEY_PREFIX}{i}");
            put_record(ctx, &key, gbtr)?;
        }
        Ok(())
    }

    /// Writes `gbtr` under `key`, replacing any existing record.
    pub fn create_gbtr(
        &self,
        ctx: &mut TransactionContext<'_>,
        key: &str,
        gbtr: &GBtr,
    ) -> Result<(), ContractError> {
        put_record(ctx, key, gbtr)
    }

    pub fn query_gbtr(
        &self,
        ctx: &mut TransactionContext<'_>,
        key: &str,
    ) -> Result<GBtr, ContractError> {
        let bytes = ctx.stub().get_state(key).map_err(ContractError::Read)?;
        match bytes {
            Some(bytes) if !bytes.is_empty() => decode_record(key, &bytes),
            _ => Err(ContractError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    pub fn query_all_gbtrs(
        &self,
        ctx: &mut TransactionContext<'_>,
    ) -> Result<Vec<QueryResult>, ContractError> {
        let mut cursor = ctx
            .stub()
            .get_state_by_range("", "")
            .map_err(ContractError::Read)?;
        let results = collect_records(&mut *cursor);
        let closed = cursor.close().map_err(ContractError::Read);
        let results = results?;
        closed?;
        Ok(results)
    }
}

fn put_record(
    ctx: &mut TransactionContext<'_>,
    key: &str,
    gbtr: &GBtr,
) -> Result<(), ContractError> {
    let bytes = serde_json::to_vec(gbtr).map_err(ContractError::Encode)?;
    ctx.stub()
        .put_state(key, &bytes)
        .map_err(ContractError::Write)?;
    debug!(tx_id = ctx.tx_id(), key, "put record");
    Ok(())
}

fn decode_record(key: &str, bytes: &[u8]) -> Result<GBtr, ContractError> {
    serde_json::from_slice(bytes).map_err(|source| {
        warn!(key, "stored value does not decode as a record");
        ContractError::CorruptRecord {
            key: key.to_string(),
            source,
        }
    })
}

fn collect_records<I>(cursor: &mut I) -> Result<Vec<QueryResult>, ContractError>
where
    I: StateQueryIterator + ?Sized,
{
    let mut results = Vec::new();
    for kv in cursor {
        let kv = kv.map_err(ContractError::Read)?;
        let record = decode_record(&kv.key, &kv.value)?;
        results.push(QueryResult {
            key: kv.key,
            record,
        });
    }
    Ok(results)
}

/// Maps `createGBtr` and `CreateGBtr` to the same entry point.
fn canonical_name(function: &str) -> String {
    let mut chars = function.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn expect_args(
    function: &'static str,
    args: &[String],
    expected: usize,
) -> Result<(), ContractError> {
    if args.len() != expected {
        return Err(ContractError::ArgumentCount {
            function,
            expected,
            received: args.len(),
        });
    }
    Ok(())
}

fn parse_arg<T>(param: &'static str, value: &str) -> Result<T, ContractError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ContractError::InvalidArgument {
            param,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Parses `obj_qty`, rejecting NaN and infinities, which JSON cannot encode.
fn parse_qty(value: &str) -> Result<f32, ContractError> {
    let qty: f32 = parse_arg("obj_qty", value)?;
    if !qty.is_finite() {
        return Err(ContractError::InvalidArgument {
            param: "obj_qty",
            value: value.to_string(),
            reason: "quantity must be finite".to_string(),
        });
    }
    Ok(qty)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ContractError> {
    serde_json::to_vec(value).map_err(ContractError::Encode)
}

impl Chaincode for GBtrContract {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        ctx: &mut TransactionContext<'_>,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>, ContractError> {
        match canonical_name(function).as_str() {
            INIT_LEDGER => {
                expect_args(INIT_LEDGER, args, 0)?;
                self.init_ledger(ctx)?;
                Ok(Vec::new())
            }
            CREATE_GBTR => {
                expect_args(CREATE_GBTR, args, 6)?;
                let gbtr = GBtr::new(
                    args[1].clone(),
                    parse_qty(&args[2])?,
                    args[3].clone(),
                    parse_arg("tick", &args[4])?,
                    args[5].clone(),
                );
                self.create_gbtr(ctx, &args[0], &gbtr)?;
                Ok(Vec::new())
            }
            QUERY_GBTR => {
                expect_args(QUERY_GBTR, args, 1)?;
                encode(&self.query_gbtr(ctx, &args[0])?)
            }
            QUERY_ALL_GBTRS => {
                expect_args(QUERY_ALL_GBTRS, args, 0)?;
                encode(&self.query_all_gbtrs(ctx)?)
            }
            _ => Err(ContractError::UnknownFunction(function.to_string())),
        }
    }
}
