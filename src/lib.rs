//! GBtr transaction-record ledger.
//!
//! * [`contracts`]: the GBtr contract and its entry points.
//! * [`ledger`]: the world-state capability the contract runs against, with
//!   in-memory and file-backed stores.
//! * [`gateway`]: connection profile, wire protocol, the client-side gateway
//!   and the peer that hosts the contract.
//! * [`wallet`]: file-system identity store.
//! * [`fixture`]: the local JSON fixture of transactions.

pub mod contracts;
pub mod fixture;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod wallet;
