//! Core runtime configuration.
//!
//! Resolved once when the database is opened and carried by [`crate::Database`], so the
//! ledger, dispensing and billing managers never read process-wide state while handling
//! a request.

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// Largest decimal scale accepted for computed charges.
const MAX_MONEY_SCALE: u32 = 10;

/// Longest "expiring soon" window, ten years.
const MAX_EXPIRY_WARNING_DAYS: i64 = 3_650;

/// Core configuration resolved at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Days ahead of today that count as "expiring soon" in expiry reports.
    pub expiry_warning_days: i64,
    /// How long a writer waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
    /// Reject dispenses by staff who do not hold the pharmacist role.
    pub require_pharmacist: bool,
    /// Decimal places kept on computed charges (pharmacy averages, bed charges).
    pub money_scale: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: 30,
            busy_timeout_ms: 5_000,
            require_pharmacist: true,
            money_scale: 2,
        }
    }
}

impl CoreConfig {
    /// Parse a JSON configuration document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: CoreConfig = serde_json::from_str(json)
            .map_err(|e| CoreError::InvalidInput(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> CoreResult<()> {
        if !(0..=MAX_EXPIRY_WARNING_DAYS).contains(&self.expiry_warning_days) {
            return Err(CoreError::InvalidInput(format!(
                "expiry_warning_days must be between 0 and {}",
                MAX_EXPIRY_WARNING_DAYS
            )));
        }
        if self.money_scale > MAX_MONEY_SCALE {
            return Err(CoreError::InvalidInput(format!(
                "money_scale must be at most {}",
                MAX_MONEY_SCALE
            )));
        }
        Ok(())
    }
}
