use std::{
    io::{self, BufReader},
    net::{TcpListener, TcpStream},
};

use tracing::{debug, info, info_span, warn};

use super::{
    protocol::{self, Outcome, Proposal, ProposalKind, ProposalResponse},
    GatewayError, Transport,
};
use crate::{
    contracts::{Chaincode, ContractError, TransactionContext},
    ledger::{LedgerError, TxSimulator, WorldState},
};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("channel {0} not found")]
    UnknownChannel(String),
    #[error("chaincode {contract} not found on channel {channel}")]
    UnknownChaincode { channel: String, contract: String },
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] LedgerError),
}

/// Hosts one contract on one channel over a world state.
///
/// Every proposal runs against a [`TxSimulator`]; the write set reaches the
/// store only for a successful submit.
pub struct Peer<S, C> {
    channel: String,
    chaincode: C,
    state: S,
}

impl<S: WorldState, C: Chaincode> Peer<S, C> {
    pub fn new(channel: impl Into<String>, chaincode: C, state: S) -> Self {
        Self {
            channel: channel.into(),
            chaincode,
            state,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn process(&mut self, proposal: &Proposal) -> ProposalResponse {
        let span = info_span!("proposal", tx_id = %proposal.tx_id, function = %proposal.function);
        let _enter = span.enter();
        let outcome = match self.execute(proposal) {
            Ok(payload) => Outcome::Payload(payload),
            Err(err) => {
                warn!(%err, "proposal failed");
                Outcome::Error(err.to_string())
            }
        };
        ProposalResponse {
            tx_id: proposal.tx_id.clone(),
            outcome,
        }
    }

    fn execute(&mut self, proposal: &Proposal) -> Result<Vec<u8>, PeerError> {
        if proposal.channel != self.channel {
            return Err(PeerError::UnknownChannel(proposal.channel.clone()));
        }
        if proposal.contract != self.chaincode.name() {
            return Err(PeerError::UnknownChaincode {
                channel: proposal.channel.clone(),
                contract: proposal.contract.clone(),
            });
        }

        let mut sim = TxSimulator::new(&self.state);
        let payload = {
            let mut ctx = TransactionContext::new(
                proposal.tx_id.clone(),
                proposal.channel.clone(),
                proposal.creator.clone(),
                &mut sim,
            );
            self.chaincode
                .invoke(&mut ctx, &proposal.function, &proposal.args)?
        };
        let writes = sim.into_write_set();

        match proposal.kind {
            ProposalKind::Submit => {
                let count = writes.len();
                self.state.commit(writes).map_err(PeerError::Commit)?;
                info!(creator = %proposal.creator.mspid, writes = count, "committed");
            }
            ProposalKind::Evaluate => {
                debug!(discarded = writes.len(), "evaluated");
            }
        }
        Ok(payload)
    }

    /// Answers proposals on `stream` until the client hangs up.
    pub fn serve_connection(&mut self, stream: TcpStream) -> io::Result<()> {
        let client = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        info!(%client, "client connected");
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;
        while let Some(line) = protocol::read_frame_line(&mut reader)? {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let response = match serde_json::from_slice::<Proposal>(&line) {
                Ok(proposal) => self.process(&proposal),
                Err(e) => {
                    warn!(%client, error = %e, "malformed proposal");
                    ProposalResponse {
                        tx_id: String::new(),
                        outcome: Outcome::Error(format!("malformed proposal: {e}")),
                    }
                }
            };
            protocol::write_frame(&mut writer, &response)?;
        }
        info!(%client, "client disconnected");
        Ok(())
    }

    /// Serves connections one at a time. `limit` bounds how many are
    /// accepted before returning; `None` serves forever.
    pub fn serve(&mut self, listener: &TcpListener, limit: Option<usize>) -> io::Result<()> {
        let mut served = 0usize;
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.serve_connection(stream) {
                        warn!(error = %e, "connection aborted");
                    }
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
            served += 1;
            if limit.is_some_and(|limit| served >= limit) {
                break;
            }
        }
        Ok(())
    }
}

impl<S: WorldState, C: Chaincode> Transport for Peer<S, C> {
    fn round_trip(&mut self, proposal: &Proposal) -> Result<ProposalResponse, GatewayError> {
        Ok(self.process(proposal))
    }

    fn close(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        contracts::GBtrContract,
        ledger::MemoryState,
        wallet::SerializedIdentity,
    };

    fn peer() -> Peer<MemoryState, GBtrContract> {
        Peer::new("mychannel", GBtrContract::new("fabcar"), MemoryState::new())
    }

    fn proposal(kind: ProposalKind, function: &str, args: &[&str]) -> Proposal {
        Proposal::new(
            kind,
            "mychannel",
            "fabcar",
            function,
            args.iter().map(|a| a.to_string()).collect(),
            SerializedIdentity::default(),
        )
    }

    #[test]
    fn submit_commits_and_evaluate_discards() {
        let mut peer = peer();
        let create = ["GBTR1", "KW", "1", "A", "1", "B"];
        let resp = peer.process(&proposal(ProposalKind::Evaluate, "createGBtr", &create));
        assert_eq!(resp.outcome, Outcome::Payload(Vec::new()));
        assert!(peer.state().is_empty());

        let req = proposal(ProposalKind::Submit, "createGBtr", &create);
        let resp = peer.process(&req);
        assert_eq!(resp.tx_id, req.tx_id);
        assert_eq!(peer.state().len(), 1);
    }

    #[test]
    fn failed_submit_commits_nothing() {
        let mut peer = peer();
        let resp = peer.process(&proposal(
            ProposalKind::Submit,
            "createGBtr",
            &["GBTR1", "KW", "x", "A", "1", "B"],
        ));
        assert!(matches!(resp.outcome, Outcome::Error(ref m) if m.contains("obj_qty")));
        assert!(peer.state().is_empty());
    }

    #[test]
    fn rejects_unknown_channel_and_chaincode() {
        let mut peer = peer();
        let mut req = proposal(ProposalKind::Evaluate, "queryAllGBtrs", &[]);
        req.channel = "other".into();
        assert_eq!(
            peer.process(&req).outcome,
            Outcome::Error("channel other not found".into())
        );
        let mut req = proposal(ProposalKind::Evaluate, "queryAllGBtrs", &[]);
        req.contract = "basic".into();
        assert_eq!(
            peer.process(&req).outcome,
            Outcome::Error("chaincode basic not found on channel mychannel".into())
        );
    }
}
