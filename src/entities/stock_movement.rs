use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of ledger movement.
///
/// Reservation and unreserve movements only move `reserved_quantity`; every
/// other type changes on-hand quantity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementType {
    #[sea_orm(string_value = "receipt")]
    Receipt,
    #[sea_orm(string_value = "issue")]
    Issue,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "transfer_out")]
    TransferOut,
    #[sea_orm(string_value = "transfer_in")]
    TransferIn,
    #[sea_orm(string_value = "reservation")]
    Reservation,
    #[sea_orm(string_value = "unreserve")]
    Unreserve,
    #[sea_orm(string_value = "return")]
    Return,
    #[sea_orm(string_value = "return_to_supplier")]
    ReturnToSupplier,
}

/// Sign a movement's quantity must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignRule {
    Positive,
    Negative,
    NonZero,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receipt => "receipt",
            MovementType::Issue => "issue",
            MovementType::Adjustment => "adjustment",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferIn => "transfer_in",
            MovementType::Reservation => "reservation",
            MovementType::Unreserve => "unreserve",
            MovementType::Return => "return",
            MovementType::ReturnToSupplier => "return_to_supplier",
        }
    }

    /// Whether the movement changes on-hand quantity.
    pub fn affects_on_hand(&self) -> bool {
        !matches!(self, MovementType::Reservation | MovementType::Unreserve)
    }

    pub fn sign_rule(&self) -> SignRule {
        match self {
            MovementType::Receipt
            | MovementType::TransferIn
            | MovementType::Return
            | MovementType::Reservation => SignRule::Positive,
            MovementType::Issue
            | MovementType::TransferOut
            | MovementType::ReturnToSupplier
            | MovementType::Unreserve => SignRule::Negative,
            MovementType::Adjustment => SignRule::NonZero,
        }
    }

    pub fn accepts(&self, quantity: Decimal) -> bool {
        match self.sign_rule() {
            SignRule::Positive => quantity > Decimal::ZERO,
            SignRule::Negative => quantity < Decimal::ZERO,
            SignRule::NonZero => !quantity.is_zero(),
        }
    }

    /// Inbound movements fold their unit cost into the weighted average.
    pub fn is_costed_inbound(&self) -> bool {
        matches!(
            self,
            MovementType::Receipt | MovementType::TransferIn | MovementType::Return
        )
    }

    /// Types that only the transfer coordinator or reservation manager write.
    pub fn is_engine_managed(&self) -> bool {
        matches!(
            self,
            MovementType::TransferOut
                | MovementType::TransferIn
                | MovementType::Reservation
                | MovementType::Unreserve
        )
    }
}

/// Immutable ledger row. Only recalculation rewrites the balance columns.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub chain_kind: String,
    pub chain_key: String,
    /// Per-chain insertion counter.
    pub sequence: i64,
    pub movement_type: MovementType,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub unit_cost: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub previous_balance: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub current_balance: Decimal,
    /// Reservation this issue/unreserve resolves.
    pub reservation_id: Option<Uuid>,
    /// Shared by both legs of a transfer.
    pub transfer_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub movement_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_aggregate::Entity",
        from = "Column::AggregateId",
        to = "super::stock_aggregate::Column::Id"
    )]
    StockAggregate,
}

impl Related<super::stock_aggregate::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockAggregate.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Change this movement applies to on-hand quantity.
    pub fn on_hand_delta(&self) -> Decimal {
        if self.movement_type.affects_on_hand() {
            self.quantity
        } else {
            Decimal::ZERO
        }
    }
}
