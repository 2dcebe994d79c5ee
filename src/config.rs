//! Compensation and service configuration.
//!
//! Percentage tables and VIP thresholds are business settings, so they live in
//! a TOML file (or fall back to the defaults below) instead of constants.

use crate::error::{EngineError, EngineResult};
use crate::models::Amount;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Referral levels paid by the cascade (and binary depth used for omset).
pub const MAX_CASCADE_LEVELS: usize = 3;

/// Compensation rules applied by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Percent of the purchase amount credited back to the buyer's income.
    pub purchase_bonus_pct: f64,
    /// Percent of the purchase amount per referral level (index 0 = direct sponsor).
    pub referral_pct: Vec<f64>,
    /// Percent of each daily profit per referral level.
    pub rebate_pct: Vec<f64>,
    /// Minimum `total_invest_vip` for VIP 1, 2, ...
    pub vip_thresholds: Vec<Amount>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            purchase_bonus_pct: 0.0,
            referral_pct: vec![15.0, 2.0, 1.0],
            rebate_pct: vec![3.0, 2.0, 1.0],
            vip_thresholds: vec![
                50_000.0,
                1_200_000.0,
                7_000_000.0,
                30_000_000.0,
                150_000_000.0,
            ],
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read compensation config {}", path.display()))?;
        let cfg: EngineConfig = toml::from_str(&raw)
            .with_context(|| format!("Invalid compensation config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let pct_ok = |p: &f64| p.is_finite() && (0.0..=100.0).contains(p);

        if !pct_ok(&self.purchase_bonus_pct) {
            return Err(EngineError::Configuration(format!(
                "purchase_bonus_pct out of range: {}",
                self.purchase_bonus_pct
            )));
        }
        for (name, table) in [("referral_pct", &self.referral_pct), ("rebate_pct", &self.rebate_pct)] {
            if table.len() > MAX_CASCADE_LEVELS {
                return Err(EngineError::Configuration(format!(
                    "{} has {} levels, at most {} are paid",
                    name,
                    table.len(),
                    MAX_CASCADE_LEVELS
                )));
            }
            if let Some(bad) = table.iter().find(|p| !pct_ok(p)) {
                return Err(EngineError::Configuration(format!(
                    "{} contains out-of-range percentage {}",
                    name, bad
                )));
            }
        }
        if self.vip_thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::Configuration(
                "vip_thresholds must be strictly ascending".to_string(),
            ));
        }
        Ok(())
    }

    /// VIP tier for a locked-category investment total.
    pub fn vip_level(&self, total_invest_vip: Amount) -> u32 {
        self.vip_thresholds
            .iter()
            .take_while(|&&t| total_invest_vip >= t)
            .count() as u32
    }
}

/// Runtime settings for the service binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_path: String,
    pub port: u16,
    pub daily_return_interval_secs: u64,
    pub reward_refresh_interval_secs: u64,
    pub compensation_config: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./referral_engine.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("Invalid PORT")?;

        let daily_return_interval_secs = std::env::var("DAILY_RETURN_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(300);

        let reward_refresh_interval_secs = std::env::var("REWARD_REFRESH_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(3600);

        let compensation_config = std::env::var("COMPENSATION_CONFIG")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_path,
            port,
            daily_return_interval_secs,
            reward_refresh_interval_secs,
            compensation_config,
        })
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        match &self.compensation_config {
            Some(path) => EngineConfig::from_toml_file(Path::new(path)),
            None => Ok(EngineConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_vip_level_thresholds() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.vip_level(0.0), 0);
        assert_eq!(cfg.vip_level(49_999.0), 0);
        assert_eq!(cfg.vip_level(50_000.0), 1);
        assert_eq!(cfg.vip_level(7_000_000.0), 3);
        assert_eq!(cfg.vip_level(500_000_000.0), 5);
    }

    #[test]
    fn test_too_many_levels_rejected() {
        let cfg = EngineConfig {
            referral_pct: vec![10.0, 5.0, 2.0, 1.0],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_unsorted_thresholds_rejected() {
        let cfg = EngineConfig {
            vip_thresholds: vec![100.0, 50.0],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "referral_pct = [10.0, 5.0]").unwrap();
        writeln!(file, "purchase_bonus_pct = 1.5").unwrap();

        let cfg = EngineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(cfg.referral_pct, vec![10.0, 5.0]);
        assert_eq!(cfg.purchase_bonus_pct, 1.5);
        assert_eq!(cfg.rebate_pct, EngineConfig::default().rebate_pct);
    }
}
