//! Collection of mocks used to test consensus.

pub mod crypto;
pub mod fixtures;
pub mod ledger;
pub mod network;
pub mod processor;
pub mod senders;
