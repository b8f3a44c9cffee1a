//! Newline-delimited JSON frames exchanged between gateway and peer.

use std::io::{self, BufRead, Write};

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::wallet::SerializedIdentity;

pub const NONCE_LEN: usize = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    /// State-changing; writes are committed.
    Submit,
    /// Read-only; writes are discarded.
    Evaluate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub tx_id: String,
    pub kind: ProposalKind,
    pub channel: String,
    pub contract: String,
    pub function: String,
    pub args: Vec<String>,
    pub creator: SerializedIdentity,
}

impl Proposal {
    pub fn new(
        kind: ProposalKind,
        channel: impl Into<String>,
        contract: impl Into<String>,
        function: impl Into<String>,
        args: Vec<String>,
        creator: SerializedIdentity,
    ) -> Self {
        Self {
            tx_id: new_tx_id(&creator),
            kind,
            channel: channel.into(),
            contract: contract.into(),
            function: function.into(),
            args,
            creator,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Payload(#[serde(with = "crate::ledger::serde_bytes")] Vec<u8>),
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub tx_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Hex SHA-256 over `nonce || mspid || certificate`.
pub fn compute_tx_id(nonce: &[u8], creator: &SerializedIdentity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator.mspid.as_bytes());
    hasher.update(creator.id_bytes.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn new_tx_id(creator: &SerializedIdentity) -> String {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    compute_tx_id(&nonce, creator)
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> io::Result<()> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}

/// Reads one frame line as raw bytes; `None` on a clean end of stream.
/// Invalid UTF-8 is left for the JSON decoder to reject.
pub fn read_frame_line<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}
