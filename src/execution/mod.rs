pub mod evm;
pub mod fees;
pub mod guard;
pub mod ledger;
pub mod submission;
