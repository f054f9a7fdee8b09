use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::chain_key::ChainKey;
use crate::entities::stock_aggregate;
use crate::entities::stock_movement::{self, MovementType};

/// External document a movement is attributed to (work order, purchase receipt, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Reference {
    #[validate(length(min = 1, max = 64))]
    pub reference_type: String,
    #[validate(length(min = 1, max = 255))]
    pub reference_id: String,
}

impl Reference {
    pub fn new(reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
        }
    }
}

/// Request to append a caller-initiated movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRequest<K> {
    pub chain_key: K,
    pub movement_type: MovementType,
    /// Signed quantity; the sign must match the movement type.
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<Reference>,
    /// Open reservation an issue consumes.
    pub reservation_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    /// Business-effective time; defaults to now.
    pub movement_date: Option<DateTime<Utc>>,
}

impl<K: ChainKey> MovementRequest<K> {
    pub fn new(chain_key: K, movement_type: MovementType, quantity: Decimal) -> Self {
        Self {
            chain_key,
            movement_type,
            quantity,
            unit_cost: None,
            reference: None,
            reservation_id: None,
            performed_by: None,
            notes: None,
            movement_date: None,
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn against_reservation(mut self, reservation_id: Uuid) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    pub fn dated(mut self, movement_date: DateTime<Utc>) -> Self {
        self.movement_date = Some(movement_date);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest<K> {
    pub chain_key: K,
    /// Positive quantity to withhold.
    pub quantity: Decimal,
    pub reference: Option<Reference>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub movement_date: Option<DateTime<Utc>>,
}

impl<K: ChainKey> ReserveRequest<K> {
    pub fn new(chain_key: K, quantity: Decimal) -> Self {
        Self {
            chain_key,
            quantity,
            reference: None,
            performed_by: None,
            notes: None,
            movement_date: None,
        }
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnreserveRequest {
    pub reason: Option<String>,
    pub performed_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest<K> {
    pub source_key: K,
    pub dest_key: K,
    /// Positive quantity to move.
    pub quantity: Decimal,
    /// Cost basis carried to the destination; defaults to the source average.
    pub unit_cost: Option<Decimal>,
    pub reference: Option<Reference>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub movement_date: Option<DateTime<Utc>>,
}

impl<K: ChainKey> TransferRequest<K> {
    pub fn new(source_key: K, dest_key: K, quantity: Decimal) -> Self {
        Self {
            source_key,
            dest_key,
            quantity,
            unit_cost: None,
            reference: None,
            performed_by: None,
            notes: None,
            movement_date: None,
        }
    }
}

/// Both legs of a committed transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer_id: Uuid,
    pub out_movement: stock_movement::Model,
    pub in_movement: stock_movement::Model,
}

/// Read-only view of a chain key's cached aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSnapshot<K> {
    pub chain_key: K,
    pub current_quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub available_quantity: Decimal,
    pub average_unit_cost: Decimal,
    pub total_value: Decimal,
    pub last_movement_at: Option<DateTime<Utc>>,
    pub movement_count: i64,
    pub needs_recalculation: bool,
    pub last_recalculated_at: Option<DateTime<Utc>>,
}

impl<K: ChainKey> StockSnapshot<K> {
    /// Snapshot of a chain key that has never had a movement.
    pub fn empty(chain_key: K) -> Self {
        Self {
            chain_key,
            current_quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            available_quantity: Decimal::ZERO,
            average_unit_cost: Decimal::ZERO,
            total_value: Decimal::ZERO,
            last_movement_at: None,
            movement_count: 0,
            needs_recalculation: false,
            last_recalculated_at: None,
        }
    }

    pub fn from_aggregate(chain_key: K, aggregate: &stock_aggregate::Model) -> Self {
        Self {
            chain_key,
            current_quantity: aggregate.current_quantity,
            reserved_quantity: aggregate.reserved_quantity,
            available_quantity: aggregate.available_quantity(),
            average_unit_cost: aggregate.average_unit_cost,
            total_value: aggregate.total_value,
            last_movement_at: aggregate.last_movement_at,
            movement_count: aggregate.movement_count,
            needs_recalculation: aggregate.needs_recalculation,
            last_recalculated_at: aggregate.last_recalculated_at,
        }
    }
}

/// A reservation movement with the quantity it still withholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenReservation {
    pub reservation: stock_movement::Model,
    pub remaining: Decimal,
}

/// Ordered audit severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Healthy,
    Minor,
    Major,
    Critical,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Healthy => "healthy",
            AuditStatus::Minor => "minor",
            AuditStatus::Major => "major",
            AuditStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport<K> {
    pub chain_key: K,
    pub status: AuditStatus,
    /// Cached `current_quantity` on the aggregate.
    pub stored_quantity: Decimal,
    /// `current_balance` of the chronologically last movement.
    pub chain_quantity: Decimal,
    /// From-scratch sum of on-hand movement quantities.
    pub calculated_quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub discrepancy_stored_vs_calculated: Decimal,
    pub discrepancy_stored_vs_chain: Decimal,
    pub chain_breaks: u64,
    pub movement_count: u64,
    pub needs_recalculation: bool,
    pub recommendations: Vec<String>,
    pub audited_at: DateTime<Utc>,
}

impl<K> AuditReport<K> {
    pub fn is_healthy(&self) -> bool {
        self.status == AuditStatus::Healthy
    }
}

/// Result of a recalculation run. Failures are reported here, not raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationOutcome {
    pub success: bool,
    pub chain_key: String,
    pub transactions_processed: u64,
    pub corrections_made: u64,
    pub initial_balance: Decimal,
    pub final_balance: Option<Decimal>,
    pub error: Option<String>,
    /// Set when the failure was transient (lock timeout).
    pub retryable: bool,
}
