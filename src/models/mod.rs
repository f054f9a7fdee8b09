pub mod chain_key;
pub mod ledger;

pub use chain_key::{ChainKey, ChainKind, FuelStockKey, PartStockKey};
pub use ledger::{
    AuditReport, AuditStatus, MovementRequest, OpenReservation, RecalculationOutcome, Reference,
    ReserveRequest, StockSnapshot, TransferRequest, TransferResult, UnreserveRequest,
};
