use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::stock_movement::MovementType;
use crate::models::{AuditStatus, ChainKind};

/// Notifications published after a ledger write commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    MovementCommitted {
        movement_id: Uuid,
        chain_kind: ChainKind,
        chain_key: String,
        movement_type: MovementType,
        quantity: Decimal,
        current_balance: Decimal,
        reserved_quantity: Decimal,
    },
    TransferCompleted {
        transfer_id: Uuid,
        chain_kind: ChainKind,
        source_key: String,
        dest_key: String,
        quantity: Decimal,
    },
    ChainRecalculated {
        chain_kind: ChainKind,
        chain_key: String,
        transactions_processed: u64,
        corrections_made: u64,
        final_balance: Decimal,
    },
    DriftDetected {
        chain_kind: ChainKind,
        chain_key: String,
        status: AuditStatus,
        discrepancy_stored_vs_calculated: Decimal,
        chain_breaks: u64,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::MovementCommitted { .. } => "movement_committed",
            LedgerEvent::TransferCompleted { .. } => "transfer_completed",
            LedgerEvent::ChainRecalculated { .. } => "chain_recalculated",
            LedgerEvent::DriftDetected { .. } => "drift_detected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<LedgerEvent>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<LedgerEvent>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LedgerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: LedgerEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends without failing the caller; the ledger write has already committed.
    pub async fn send_or_log(&self, event: LedgerEvent) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "dropping ledger event");
        }
    }
}

/// Consumes ledger events and logs them.
pub async fn process_events(mut rx: mpsc::Receiver<LedgerEvent>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            LedgerEvent::MovementCommitted {
                movement_id,
                chain_kind,
                chain_key,
                movement_type,
                quantity,
                current_balance,
                ..
            } => {
                info!(
                    %movement_id,
                    chain_kind = chain_kind.as_str(),
                    chain_key = %chain_key,
                    movement_type = movement_type.as_str(),
                    %quantity,
                    %current_balance,
                    "movement committed"
                );
            }
            LedgerEvent::TransferCompleted {
                transfer_id,
                source_key,
                dest_key,
                quantity,
                ..
            } => {
                info!(%transfer_id, %source_key, %dest_key, %quantity, "transfer completed");
            }
            LedgerEvent::ChainRecalculated {
                chain_key,
                corrections_made,
                final_balance,
                ..
            } => {
                info!(%chain_key, corrections_made, %final_balance, "chain recalculated");
            }
            LedgerEvent::DriftDetected {
                chain_key,
                status,
                discrepancy_stored_vs_calculated,
                chain_breaks,
                ..
            } => {
                warn!(
                    %chain_key,
                    status = status.as_str(),
                    discrepancy = %discrepancy_stored_vs_calculated,
                    chain_breaks,
                    "ledger drift detected"
                );
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_survives_closed_receiver() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);

        sender
            .send_or_log(LedgerEvent::ChainRecalculated {
                chain_kind: ChainKind::FuelStock,
                chain_key: "wh".into(),
                transactions_processed: 0,
                corrections_made: 0,
                final_balance: Decimal::ZERO,
            })
            .await;
    }

    #[tokio::test]
    async fn events_reach_receiver_in_order() {
        let (sender, mut rx) = EventSender::channel(4);
        let first = LedgerEvent::TransferCompleted {
            transfer_id: Uuid::new_v4(),
            chain_kind: ChainKind::PartStock,
            source_key: "a".into(),
            dest_key: "b".into(),
            quantity: Decimal::ONE,
        };
        sender.send(first.clone()).await.unwrap();

        assert_eq!(rx.recv().await, Some(first));
    }
}
