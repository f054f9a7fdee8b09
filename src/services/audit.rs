//! Drift detection for a chain key.
//!
//! An audit compares three balances: the cached aggregate, the last
//! movement's `current_balance`, and the raw sum of on-hand quantities. It
//! never writes and never treats a discrepancy as an error.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::balance_calculator;
use super::ledger_store;
use super::stock_ledger::StockLedger;
use crate::config::AuditThresholds;
use crate::errors::ServiceError;
use crate::events::LedgerEvent;
use crate::models::{AuditReport, AuditStatus, ChainKey};

/// Raw findings before grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Findings {
    pub discrepancy_stored_vs_calculated: Decimal,
    pub discrepancy_stored_vs_chain: Decimal,
    pub chain_breaks: u64,
    pub current_quantity: Decimal,
    pub reserved_quantity: Decimal,
}

/// Grades findings against the configured bands.
///
/// Negative stock, negative holds, or holds above on-hand are always
/// critical. Otherwise the worse of the discrepancy grade and the
/// chain-break grade wins.
pub fn classify(findings: &Findings, thresholds: &AuditThresholds) -> AuditStatus {
    if findings.reserved_quantity > findings.current_quantity
        || findings.reserved_quantity < Decimal::ZERO
        || findings.current_quantity < Decimal::ZERO
    {
        return AuditStatus::Critical;
    }

    let drift = findings
        .discrepancy_stored_vs_calculated
        .abs()
        .max(findings.discrepancy_stored_vs_chain.abs());
    let by_drift = if drift.is_zero() {
        AuditStatus::Healthy
    } else if drift <= thresholds.minor_discrepancy {
        AuditStatus::Minor
    } else if drift <= thresholds.major_discrepancy {
        AuditStatus::Major
    } else {
        AuditStatus::Critical
    };

    let by_breaks = if findings.chain_breaks == 0 {
        AuditStatus::Healthy
    } else if findings.chain_breaks < thresholds.major_chain_breaks {
        AuditStatus::Minor
    } else {
        AuditStatus::Major
    };

    by_drift.max(by_breaks)
}

fn recommendations(findings: &Findings, needs_recalculation: bool) -> Vec<String> {
    let mut out = Vec::new();

    if !findings.discrepancy_stored_vs_calculated.is_zero() {
        out.push(format!(
            "Cached balance differs from the movement sum by {}; run recalculation to rebuild it",
            findings.discrepancy_stored_vs_calculated
        ));
    }
    if !findings.discrepancy_stored_vs_chain.is_zero() {
        out.push(format!(
            "Cached balance differs from the last movement's balance by {}",
            findings.discrepancy_stored_vs_chain
        ));
    }
    if findings.chain_breaks > 0 {
        out.push(format!(
            "{} movement(s) do not continue the previous balance; run recalculation to restamp the chain",
            findings.chain_breaks
        ));
    }
    if needs_recalculation {
        out.push("Backdated movements were recorded since the last recalculation".to_string());
    }
    if findings.reserved_quantity > findings.current_quantity {
        out.push(format!(
            "Reserved quantity {} exceeds on-hand quantity {}; review open reservations",
            findings.reserved_quantity, findings.current_quantity
        ));
    }
    if findings.current_quantity < Decimal::ZERO {
        out.push("On-hand quantity is negative; investigate recent issues and adjustments".to_string());
    }

    out
}

impl<K: ChainKey> StockLedger<K> {
    /// Audits one chain key without taking its lock.
    ///
    /// A known key with no movements yet reports a healthy zero state. Only
    /// an unknown key or a datastore failure is returned as an error.
    #[instrument(skip(self), fields(kind = K::KIND.as_str(), chain_key = %key))]
    pub async fn audit(&self, key: &K) -> Result<AuditReport<K>, ServiceError> {
        let db = self.db.as_ref();
        ledger_store::ensure_chain_key_exists(db, key).await?;

        let aggregate = ledger_store::find_aggregate(db, key, false).await?;
        let mut movements = ledger_store::movements_for(db, K::KIND, &key.storage_key()).await?;
        balance_calculator::sort_chronologically(&mut movements);

        let (stored, reserved, needs_recalculation) = aggregate
            .as_ref()
            .map(|a| (a.current_quantity, a.reserved_quantity, a.needs_recalculation))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO, false));
        let chain_quantity = movements
            .last()
            .map(|m| m.current_balance)
            .unwrap_or(Decimal::ZERO);
        let calculated = balance_calculator::sum_on_hand(&movements)?;
        let discrepancy = |other: Decimal| {
            stored.checked_sub(other).ok_or_else(|| {
                ServiceError::InvalidQuantity(format!("stored balance {} is out of range", stored))
            })
        };

        let findings = Findings {
            discrepancy_stored_vs_calculated: discrepancy(calculated)?,
            discrepancy_stored_vs_chain: discrepancy(chain_quantity)?,
            chain_breaks: balance_calculator::count_chain_breaks(&movements),
            current_quantity: stored,
            reserved_quantity: reserved,
        };
        let status = classify(&findings, &self.config.audit);

        counter!(
            "inventory_ledger.audits",
            1,
            "kind" => K::KIND.as_str(),
            "status" => status.as_str()
        );

        if status != AuditStatus::Healthy {
            warn!(
                status = status.as_str(),
                stored = %stored,
                calculated = %calculated,
                chain = %chain_quantity,
                chain_breaks = findings.chain_breaks,
                "ledger drift detected"
            );
            self.publish(LedgerEvent::DriftDetected {
                chain_kind: K::KIND,
                chain_key: key.storage_key(),
                status,
                discrepancy_stored_vs_calculated: findings.discrepancy_stored_vs_calculated,
                chain_breaks: findings.chain_breaks,
            })
            .await;
        }

        Ok(AuditReport {
            chain_key: key.clone(),
            status,
            stored_quantity: stored,
            chain_quantity,
            calculated_quantity: calculated,
            reserved_quantity: reserved,
            discrepancy_stored_vs_calculated: findings.discrepancy_stored_vs_calculated,
            discrepancy_stored_vs_chain: findings.discrepancy_stored_vs_chain,
            chain_breaks: findings.chain_breaks,
            movement_count: movements.len() as u64,
            needs_recalculation,
            recommendations: recommendations(&findings, needs_recalculation),
            audited_at: Utc::now(),
        })
    }

    /// Audits every chain key of this kind that has an aggregate.
    #[instrument(skip(self), fields(kind = K::KIND.as_str()))]
    pub async fn audit_all(&self) -> Result<Vec<AuditReport<K>>, ServiceError> {
        let keys = self.chain_keys().await?;
        let mut reports = Vec::with_capacity(keys.len());
        for key in keys {
            match self.audit(&key).await {
                Ok(report) => reports.push(report),
                // Entity retired after its chain was created
                Err(ServiceError::InvalidChainKey(reason)) => {
                    warn!(chain_key = %key, %reason, "skipping chain of inactive entity");
                }
                Err(e) => return Err(e),
            }
        }

        let unhealthy = reports.iter().filter(|r| !r.is_healthy()).count();
        info!(audited = reports.len(), unhealthy, "audit sweep finished");
        Ok(reports)
    }

    /// Runs `audit_all` every `interval` until the returned task is aborted.
    pub fn spawn_audit_worker(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                kind = K::KIND.as_str(),
                interval_secs = interval.as_secs(),
                "audit worker started"
            );

            loop {
                ticker.tick().await;
                match self.audit_all().await {
                    Ok(reports) => {
                        for report in reports.iter().filter(|r| !r.is_healthy()) {
                            warn!(
                                chain_key = %report.chain_key,
                                status = report.status.as_str(),
                                chain_breaks = report.chain_breaks,
                                discrepancy = %report.discrepancy_stored_vs_calculated,
                                "chain needs attention"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "audit sweep failed"),
                }
            }
        })
    }
}
