//! Token and cost accounting.
//!
//! The [`UsageLedger`] keeps per-provider and global running totals. Totals
//! only ever grow; `current_usage` is the one figure that can be reset, when a
//! new billing period starts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};

/// Ratio at which a provider's quota is shown as a warning.
pub const WARNING_THRESHOLD: f64 = 0.75;

/// Ratio at which a provider's quota is shown as critical.
pub const CRITICAL_THRESHOLD: f64 = 0.90;

/// Usage figures for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUsage {
    /// Cumulative tokens across all periods.
    pub tokens_used: u64,
    /// Cumulative cost across all periods.
    pub cost: f64,
    /// Cost accrued in the current period, compared against `usage_limit`.
    pub current_usage: f64,
    /// Quota for the current period; `None` or zero means unbounded.
    pub usage_limit: Option<f64>,
}

/// Totals across every provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub tokens_used: u64,
    pub total_cost: f64,
    /// Terminal generations seen, successful or not.
    pub generation_count: u64,
    pub successful_generations: u64,
}

impl LedgerTotals {
    /// Share of generations that completed, 0.0 when none have run.
    pub fn success_rate(&self) -> f64 {
        if self.generation_count == 0 {
            0.0
        } else {
            self.successful_generations as f64 / self.generation_count as f64
        }
    }
}

/// Quota usage relative to a provider's limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UsageRatio {
    Bounded(f64),
    Unbounded,
}

/// Display band for a [`UsageRatio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Normal,
    Warning,
    Critical,
}

impl UsageLevel {
    /// Map a ratio onto a display band using the threshold constants.
    pub fn from_ratio(ratio: UsageRatio) -> Self {
        match ratio {
            UsageRatio::Unbounded => UsageLevel::Normal,
            UsageRatio::Bounded(r) if r >= CRITICAL_THRESHOLD => UsageLevel::Critical,
            UsageRatio::Bounded(r) if r >= WARNING_THRESHOLD => UsageLevel::Warning,
            UsageRatio::Bounded(_) => UsageLevel::Normal,
        }
    }
}

/// Read-only copy of the ledger for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub providers: HashMap<String, ProviderUsage>,
    pub totals: LedgerTotals,
    pub success_rate: f64,
}

/// Running usage accounting for one session.
///
/// The ledger does not deduplicate: callers record each completed generation once.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    providers: HashMap<String, ProviderUsage>,
    totals: LedgerTotals,
}

impl UsageLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger with quotas already configured.
    pub fn with_limits(limits: &HashMap<String, f64>) -> Self {
        let mut ledger = Self::new();
        for (provider, limit) in limits {
            ledger.set_usage_limit(provider, Some(*limit));
        }
        ledger
    }

    /// Add one completed generation's usage to `provider` and the global totals.
    pub fn record_usage(&mut self, provider: &str, tokens: u64, cost: f64) -> LedgerResult<()> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(LedgerError::InvalidAmount {
                provider: provider.to_string(),
                reason: format!("cost must be a non-negative number, got {}", cost),
            });
        }

        let usage = self.providers.entry(provider.to_string()).or_default();
        usage.tokens_used = usage.tokens_used.saturating_add(tokens);
        usage.cost += cost;
        usage.current_usage += cost;

        self.totals.tokens_used = self.totals.tokens_used.saturating_add(tokens);
        self.totals.total_cost += cost;

        debug!(
            provider = %provider,
            tokens = tokens,
            cost = cost,
            current_usage = usage.current_usage,
            "Usage recorded"
        );
        Ok(())
    }

    /// Count a terminal generation toward `generation_count` and the success rate.
    pub fn record_outcome(&mut self, success: bool) {
        self.totals.generation_count += 1;
        if success {
            self.totals.successful_generations += 1;
        }
    }

    /// `current_usage / usage_limit`, or `Unbounded` when no positive limit is set.
    pub fn usage_ratio(&self, provider: &str) -> UsageRatio {
        match self.providers.get(provider) {
            Some(ProviderUsage {
                usage_limit: Some(limit),
                current_usage,
                ..
            }) if *limit > 0.0 => UsageRatio::Bounded(current_usage / limit),
            _ => UsageRatio::Unbounded,
        }
    }

    /// Display band for a provider's current usage.
    pub fn usage_level(&self, provider: &str) -> UsageLevel {
        UsageLevel::from_ratio(self.usage_ratio(provider))
    }

    /// Configure or clear a provider's quota.
    pub fn set_usage_limit(&mut self, provider: &str, limit: Option<f64>) {
        let usage = self.providers.entry(provider.to_string()).or_default();
        usage.usage_limit = limit.filter(|l| l.is_finite() && *l >= 0.0);
    }

    /// Start a new billing period for `provider`; cumulative totals are kept.
    pub fn reset_current_usage(&mut self, provider: &str) {
        if let Some(usage) = self.providers.get_mut(provider) {
            info!(
                provider = %provider,
                previous = usage.current_usage,
                "Resetting provider usage period"
            );
            usage.current_usage = 0.0;
        }
    }

    /// Usage for one provider, if it has been seen.
    pub fn provider(&self, provider: &str) -> Option<&ProviderUsage> {
        self.providers.get(provider)
    }

    /// Global totals.
    pub fn totals(&self) -> &LedgerTotals {
        &self.totals
    }

    /// Copy of all figures for display.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            providers: self.providers.clone(),
            totals: self.totals.clone(),
            success_rate: self.totals.success_rate(),
        }
    }
}
