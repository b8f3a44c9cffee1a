//! Client side of the ledger gateway and the peer that serves it.
//!
//! A [`Gateway`] owns one connection to a peer. From it a [`Network`] (one
//! channel) and a [`Contract`] (one deployed contract) are resolved, and the
//! contract handle submits or evaluates transactions by name.

use std::{
    cell::RefCell,
    io::{self, BufReader},
    net::{Shutdown, TcpStream},
    path::PathBuf,
};

use tracing::{debug, info};

use crate::wallet::X509Identity;

pub mod peer;
pub mod profile;
pub mod protocol;

pub use peer::{Peer, PeerError};
pub use profile::ConnectionProfile;
pub use protocol::{Outcome, Proposal, ProposalKind, ProposalResponse};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to read connection profile {path}: {source}")]
    ProfileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("connection profile {path} is malformed: {source}")]
    ProfileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("organization {0} is not defined in the connection profile")]
    UnknownOrganization(String),
    #[error("organization {0} lists no peers")]
    NoPeers(String),
    #[error("peer {0} is not defined in the connection profile")]
    UnknownPeer(String),
    #[error("peer url {0} is not of the form host:port")]
    PeerUrl(String),
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed response: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("connection closed by peer")]
    Disconnected,
    #[error("response for transaction {received} does not match request {expected}")]
    TxMismatch { expected: String, received: String },
    #[error("transaction {function} returned error: {message}")]
    Endorsement { function: String, message: String },
}

/// Carries proposals to a peer and brings back its response.
pub trait Transport {
    fn round_trip(&mut self, proposal: &Proposal) -> Result<ProposalResponse, GatewayError>;

    fn close(&mut self) -> Result<(), GatewayError>;
}

pub struct TcpTransport {
    addr: String,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    closed: bool,
}

impl TcpTransport {
    pub fn connect(addr: &str) -> Result<Self, GatewayError> {
        let stream = TcpStream::connect(addr).map_err(|source| GatewayError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            addr: addr.to_string(),
            reader,
            writer: stream,
            closed: false,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Transport for TcpTransport {
    fn round_trip(&mut self, proposal: &Proposal) -> Result<ProposalResponse, GatewayError> {
        if self.closed {
            return Err(GatewayError::Disconnected);
        }
        protocol::write_frame(&mut self.writer, proposal)?;
        let line =
            protocol::read_frame_line(&mut self.reader)?.ok_or(GatewayError::Disconnected)?;
        Ok(serde_json::from_slice(&line)?)
    }

    fn close(&mut self) -> Result<(), GatewayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.writer.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => {
                debug!(addr = %self.addr, "closed gateway connection");
                Ok(())
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Session with the ledger network under one identity.
///
/// The underlying connection is released by [`Gateway::close`] or, failing
/// that, when the gateway is dropped.
pub struct Gateway {
    identity: X509Identity,
    transport: RefCell<Box<dyn Transport>>,
}

impl Gateway {
    /// Connects to the first peer of the profile's client organization.
    pub fn connect(
        profile: &ConnectionProfile,
        identity: X509Identity,
        as_localhost: bool,
    ) -> Result<Self, GatewayError> {
        let (peer, addr) = profile.resolve_peer(as_localhost)?;
        let transport = TcpTransport::connect(&addr)?;
        info!(%peer, %addr, msp_id = %identity.msp_id, "connected to gateway");
        Ok(Self::with_transport(Box::new(transport), identity))
    }

    pub fn with_transport(transport: Box<dyn Transport>, identity: X509Identity) -> Self {
        Self {
            identity,
            transport: RefCell::new(transport),
        }
    }

    pub fn identity(&self) -> &X509Identity {
        &self.identity
    }

    pub fn network(&self, channel: &str) -> Network<'_> {
        Network {
            gateway: self,
            channel: channel.to_string(),
        }
    }

    pub fn close(mut self) -> Result<(), GatewayError> {
        self.transport.get_mut().close()
    }

    fn invoke(
        &self,
        kind: ProposalKind,
        channel: &str,
        contract: &str,
        function: &str,
        args: &[&str],
    ) -> Result<Vec<u8>, GatewayError> {
        let proposal = Proposal::new(
            kind,
            channel,
            contract,
            function,
            args.iter().map(|a| a.to_string()).collect(),
            self.identity.serialized(),
        );
        debug!(tx_id = %proposal.tx_id, ?kind, function, "sending proposal");
        let response = self.transport.borrow_mut().round_trip(&proposal)?;
        if response.tx_id != proposal.tx_id {
            return Err(GatewayError::TxMismatch {
                expected: proposal.tx_id,
                received: response.tx_id,
            });
        }
        match response.outcome {
            Outcome::Payload(payload) => Ok(payload),
            Outcome::Error(message) => Err(GatewayError::Endorsement {
                function: function.to_string(),
                message,
            }),
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        let _ = self.transport.get_mut().close();
    }
}

pub struct Network<'g> {
    gateway: &'g Gateway,
    channel: String,
}

impl<'g> Network<'g> {
    pub fn name(&self) -> &str {
        &self.channel
    }

    pub fn contract(&self, name: &str) -> Contract<'g> {
        Contract {
            gateway: self.gateway,
            channel: self.channel.clone(),
            name: name.to_string(),
        }
    }
}

pub struct Contract<'g> {
    gateway: &'g Gateway,
    channel: String,
    name: String,
}

impl Contract<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `function` and commits its writes.
    pub fn submit_transaction(&self, function: &str, args: &[&str]) -> Result<Vec<u8>, GatewayError> {
        self.gateway
            .invoke(ProposalKind::Submit, &self.channel, &self.name, function, args)
    }

    /// Runs `function` read-only; any writes it makes are discarded.
    pub fn evaluate_transaction(
        &self,
        function: &str,
        args: &[&str],
    ) -> Result<Vec<u8>, GatewayError> {
        self.gateway
            .invoke(ProposalKind::Evaluate, &self.channel, &self.name, function, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        contracts::{GBtr, GBtrContract},
        ledger::MemoryState,
    };

    fn gateway() -> Gateway {
        let peer = Peer::new("mychannel", GBtrContract::new("fabcar"), MemoryState::new());
        Gateway::with_transport(
            Box::new(peer),
            X509Identity::new("Org1MSP", "cert", "key"),
        )
    }

    #[test]
    fn submit_then_evaluate_in_process() {
        let gateway = gateway();
        let contract = gateway.network("mychannel").contract("fabcar");
        let out = contract
            .submit_transaction("createGBtr", &["GBTR22", "KW", "66", "FMV", "10", "Market"])
            .unwrap();
        assert!(out.is_empty());
        let out = contract.evaluate_transaction("queryGBtr", &["GBTR22"]).unwrap();
        let gbtr: GBtr = serde_json::from_slice(&out).unwrap();
        assert_eq!(gbtr, GBtr::new("KW", 66.0, "FMV", 10, "Market"));
        gateway.close().unwrap();
    }

    #[test]
    fn remote_errors_carry_message() {
        let gateway = gateway();
        let contract = gateway.network("mychannel").contract("fabcar");
        let err = contract
            .evaluate_transaction("queryGBtr", &["GBTR404"])
            .unwrap_err();
        match err {
            GatewayError::Endorsement { function, message } => {
                assert_eq!(function, "queryGBtr");
                assert_eq!(message, "GBTR404 does not exist");
            }
            other => panic!("unexpected error {other}"),
        }

        let other = gateway.network("otherchannel").contract("fabcar");
        assert!(matches!(
            other.evaluate_transaction("queryAllGBtrs", &[]),
            Err(GatewayError::Endorsement { .. })
        ));
    }

    #[test]
    fn evaluate_does_not_commit() {
        let gateway = gateway();
        let contract = gateway.network("mychannel").contract("fabcar");
        contract.evaluate_transaction("initLedger", &[]).unwrap();
        let out = contract.evaluate_transaction("queryAllGBtrs", &[]).unwrap();
        assert_eq!(out, b"[]");
        contract.submit_transaction("initLedger", &[]).unwrap();
        let out = contract.evaluate_transaction("queryAllGBtrs", &[]).unwrap();
        let all: Vec<crate::contracts::QueryResult> = serde_json::from_slice(&out).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "GBTR0");
    }
}
