//! Services composing the ledger and settlement core

pub mod conversion;
pub mod coordinator;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod risk;
pub mod wallet;

#[cfg(test)]
mod coordinator_test;
