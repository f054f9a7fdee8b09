// Ledger engine components
pub mod audit;
pub mod balance_calculator;
pub mod ledger_store;
pub mod recalculation;
pub mod reservations;
pub mod stock_ledger;
pub mod transfers;

// Tracked entity registry
pub mod entity_directory;

pub use entity_directory::{EntityDirectory, RegisterEntityRequest};
pub use stock_ledger::StockLedger;
