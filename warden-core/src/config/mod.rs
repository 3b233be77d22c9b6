pub mod types;

pub use types::*;

use crate::core::ConfigError;
use ::config::{Config as ConfigLoader, Environment, File};
use std::path::Path;

/// Environment prefix: `WARDEN__LIMITS__MAX_DAILY_DRAWDOWN=0.03`
const ENV_PREFIX: &str = "WARDEN";

impl Config {
    /// Load configuration from file with optional environment variable overrides
    ///
    /// Every numeric threshold under `[limits]` must be present; ambient
    /// sections fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref();
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }

        let config = ConfigLoader::builder()
            .set_default("logging.log_level", "info")?
            .set_default("logging.json_logs", false)?
            .set_default("kill_switch.in_memory", false)?
            .set_default("gateway.paper", false)?
            // Load from TOML file
            .add_source(File::from(config_path))
            // Override with environment variables (WARDEN__)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// Load `path` if given, otherwise the documented defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let cfg = Config::default();
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;

        let account = &self.account;
        if !account.initial_balance.is_finite() || account.initial_balance <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "account.initial_balance",
                value: account.initial_balance,
                reason: "must be positive",
            });
        }
        if !account.contract_size.is_finite() || account.contract_size <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "account.contract_size",
                value: account.contract_size,
                reason: "must be positive",
            });
        }
        if account.symbols.is_empty() {
            return Err(ConfigError::Invalid {
                field: "account.symbols",
                reason: "at least one symbol is required".to_string(),
            });
        }
        if let Some(dup) = account
            .symbols
            .iter()
            .enumerate()
            .find(|(i, s)| account.symbols[..*i].contains(s))
            .map(|(_, s)| s)
        {
            return Err(ConfigError::Invalid {
                field: "account.symbols",
                reason: format!("duplicate symbol '{}'", dup),
            });
        }

        if self.gateway.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "gateway.command_timeout_ms",
                reason: "must be at least 1ms".to_string(),
            });
        }
        if let Some(price) = self.gateway.paper_fill_price {
            if !price.is_finite() || price <= 0.0 {
                return Err(ConfigError::OutOfRange {
                    field: "gateway.paper_fill_price",
                    value: price,
                    reason: "must be positive",
                });
            }
        }

        if self.kill_switch.identity.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "kill_switch.identity",
                reason: "must not be empty".to_string(),
            });
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.log_level.as_str()) {
            return Err(ConfigError::Invalid {
                field: "logging.log_level",
                reason: format!(
                    "'{}' must be one of: {:?}",
                    self.logging.log_level, valid_log_levels
                ),
            });
        }

        Ok(())
    }
}

impl RiskLimitsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fraction("limits.max_daily_drawdown", self.max_daily_drawdown)?;
        fraction("limits.drawdown_warning", self.drawdown_warning)?;
        if self.drawdown_warning >= self.max_daily_drawdown {
            return Err(ConfigError::OutOfRange {
                field: "limits.drawdown_warning",
                value: self.drawdown_warning,
                reason: "must be below max_daily_drawdown",
            });
        }

        positive("limits.max_account_leverage", self.max_account_leverage)?;
        positive("limits.leverage_warning", self.leverage_warning)?;
        if self.leverage_warning >= self.max_account_leverage {
            return Err(ConfigError::OutOfRange {
                field: "limits.leverage_warning",
                value: self.leverage_warning,
                reason: "must be below max_account_leverage",
            });
        }

        if self.tick_processing_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.tick_processing_timeout_ms",
                reason: "must be at least 1ms".to_string(),
            });
        }
        if self.max_consecutive_losses == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_consecutive_losses",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.critical_after_ticks == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.critical_after_ticks",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

fn fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            reason: "must be a fraction in (0, 1]",
        });
    }
    Ok(())
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            reason: "must be positive",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const FULL_LIMITS: &str = r#"
[limits]
max_daily_drawdown = 0.02
max_account_leverage = 5.0
drawdown_warning = 0.01
leverage_warning = 3.0
kill_switch_mode = "manual"
recovery_cooldown_seconds = 300
tick_processing_timeout_ms = 10
max_consecutive_losses = 5
"#;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.limits.kill_switch_mode, KillSwitchMode::Manual);
        assert_eq!(cfg.limits.critical_after_ticks, 3);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(&format!(
            "{}\n[account]\ninitial_balance = 50000.0\nsymbols = [\"EURUSD\", \"XAUUSD\"]\n",
            FULL_LIMITS
        ));
        let cfg = Config::load(file.path()).unwrap();

        assert_eq!(cfg.limits.max_daily_drawdown, 0.02);
        assert_eq!(cfg.limits.max_account_leverage, 5.0);
        assert_eq!(cfg.limits.recovery_cooldown_seconds, 300);
        assert_eq!(cfg.account.initial_balance, 50_000.0);
        assert_eq!(cfg.account.symbols, vec!["EURUSD", "XAUUSD"]);
        // ambient sections fall back to defaults
        assert_eq!(cfg.logging.log_level, "info");
        assert_eq!(cfg.gateway.command_timeout_ms, 2_000);
    }

    #[test]
    fn test_missing_threshold_is_rejected() {
        let file = write_config(
            r#"
[limits]
max_daily_drawdown = 0.02
drawdown_warning = 0.01
leverage_warning = 3.0
recovery_cooldown_seconds = 300
tick_processing_timeout_ms = 10
max_consecutive_losses = 5
"#,
        );
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = Config::load("/nonexistent/warden.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_validation_rejects_bad_limits() {
        let mut limits = RiskLimitsConfig::default();
        limits.max_daily_drawdown = 1.5;
        assert!(limits.validate().is_err());

        let mut limits = RiskLimitsConfig::default();
        limits.drawdown_warning = 0.03;
        assert!(limits.validate().is_err());

        let mut limits = RiskLimitsConfig::default();
        limits.leverage_warning = 5.0;
        assert!(limits.validate().is_err());

        let mut limits = RiskLimitsConfig::default();
        limits.max_account_leverage = f64::NAN;
        assert!(limits.validate().is_err());

        let mut limits = RiskLimitsConfig::default();
        limits.tick_processing_timeout_ms = 0;
        assert!(limits.validate().is_err());

        let mut limits = RiskLimitsConfig::default();
        limits.max_consecutive_losses = 0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_ambient_settings() {
        let mut cfg = Config::default();
        cfg.account.initial_balance = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.account.symbols = vec!["EURUSD".into(), "EURUSD".into()];
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.logging.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_auto_mode_parses() {
        let file = write_config(&FULL_LIMITS.replace("\"manual\"", "\"auto\""));
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.limits.kill_switch_mode, KillSwitchMode::Auto);
    }
}
