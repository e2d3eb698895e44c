pub mod chunking_strategy;
pub mod corpus;
pub mod fingerprint;
pub mod index_manager;
pub mod ledger;
