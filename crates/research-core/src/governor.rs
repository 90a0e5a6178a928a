use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use research_types::{BudgetPeriod, Money};
use tokio::sync::RwLock;

use crate::config::BudgetConfig;
use crate::ledger::CostLedger;

/// Ceilings the Governor will not exceed regardless of configured soft
/// limits or an operator override.
pub const HARD_PER_OP: Money = Money::from_micros(10_000_000);
pub const HARD_PER_DAY: Money = Money::from_micros(50_000_000);
pub const HARD_PER_MONTH: Money = Money::from_micros(500_000_000);

const CIRCUIT_FAILURE_THRESHOLD: u32 = 3;
const CIRCUIT_WINDOW: Duration = Duration::minutes(15);
const CIRCUIT_COOLDOWN: Duration = Duration::minutes(10);

#[derive(Debug, Clone, PartialEq)]
pub enum GovernorDecision {
    Allow,
    Deny { reason: String },
    RequireConfirm { reason: String },
}

struct CircuitState {
    failure_times: VecDeque<DateTime<Utc>>,
    tripped_until: Option<DateTime<Utc>>,
}

/// Policy evaluation over the Ledger (C2): approve/deny/require-confirm
/// decisions, and the engine-wide circuit breaker that pauses submissions
/// after a burst of consecutive provider failures.
pub struct CostGovernor {
    ledger: Arc<CostLedger>,
    budget: BudgetConfig,
    circuit: RwLock<CircuitState>,
}

impl CostGovernor {
    pub fn new(ledger: Arc<CostLedger>, budget: BudgetConfig) -> Self {
        CostGovernor {
            ledger,
            budget,
            circuit: RwLock::new(CircuitState {
                failure_times: VecDeque::new(),
                tripped_until: None,
            }),
        }
    }

    fn soft_per_op(&self) -> Money {
        Money::from_dollars(self.budget.per_op).min(HARD_PER_OP)
    }

    fn soft_per_day(&self) -> Money {
        Money::from_dollars(self.budget.per_day).min(HARD_PER_DAY)
    }

    fn soft_per_month(&self) -> Money {
        Money::from_dollars(self.budget.per_month).min(HARD_PER_MONTH)
    }

    pub async fn check_submit(&self, estimated_cost: Money, interactive: bool) -> GovernorDecision {
        let now = Utc::now();

        if let Some(until) = self.circuit.read().await.tripped_until {
            if until > now {
                return GovernorDecision::Deny {
                    reason: format!("circuit breaker open until {until}"),
                };
            }
        }

        if estimated_cost > self.soft_per_op() || estimated_cost > HARD_PER_OP {
            return GovernorDecision::Deny {
                reason: format!("estimated cost {estimated_cost} exceeds per-operation cap"),
            };
        }

        let day_spent = self.ledger.sum_for_period(BudgetPeriod::Day, now).await;
        let day_cap = self.soft_per_day();
        if day_spent + estimated_cost > day_cap {
            let remaining = if day_cap > day_spent { day_cap - day_spent } else { Money::ZERO };
            return GovernorDecision::Deny {
                reason: format!("remaining={remaining}"),
            };
        }

        let month_spent = self.ledger.sum_for_period(BudgetPeriod::Month, now).await;
        let month_cap = self.soft_per_month();
        if month_spent + estimated_cost > month_cap {
            let remaining = if month_cap > month_spent {
                month_cap - month_spent
            } else {
                Money::ZERO
            };
            return GovernorDecision::Deny {
                reason: format!("remaining={remaining}"),
            };
        }

        let remaining_daily = day_cap - day_spent;
        if interactive && remaining_daily.micros() > 0 {
            let ratio = estimated_cost.ratio_of(remaining_daily);
            if ratio >= 0.80 {
                return GovernorDecision::RequireConfirm {
                    reason: format!(
                        "estimated cost is {:.0}% of remaining daily budget ({remaining_daily})",
                        ratio * 100.0
                    ),
                };
            }
        }

        GovernorDecision::Allow
    }

    /// Call after a provider submission fails. Returns true if the breaker
    /// is now open (or remains open) and new submissions should pause.
    pub async fn circuit_breaker_trip(&self, consecutive_failures: u32) -> bool {
        let now = Utc::now();
        let mut state = self.circuit.write().await;
        state.failure_times.push_back(now);
        while let Some(front) = state.failure_times.front() {
            if now - *front > CIRCUIT_WINDOW {
                state.failure_times.pop_front();
            } else {
                break;
            }
        }
        if consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD {
            state.tripped_until = Some(now + CIRCUIT_COOLDOWN);
            true
        } else {
            state.tripped_until.map(|until| until > now).unwrap_or(false)
        }
    }

    /// Call after a provider submission succeeds. The breaker clears only
    /// once the cooldown window has actually elapsed.
    pub async fn note_success(&self) {
        let now = Utc::now();
        let mut state = self.circuit.write().await;
        if let Some(until) = state.tripped_until {
            if now >= until {
                state.tripped_until = None;
                state.failure_times.clear();
            }
        }
    }
}
