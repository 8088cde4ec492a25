use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use stacks_types::Amount;

use crate::error::{CirculationError, CirculationResult};

/// Circulation policy: loan period and fine schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CirculationConfig {
    /// Days between checkout and due date.
    pub checkout_period_days: i64,
    /// Fine per started day overdue.
    pub fine_rate: Amount,
    /// Cap on the overdue fine for a single transaction.
    pub max_fine: Amount,
    /// Flat fine charged when a book is reported lost.
    pub lost_book_fine: Amount,
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            checkout_period_days: 14,
            fine_rate: 5,
            max_fine: 500,
            lost_book_fine: 1000,
        }
    }
}

impl CirculationConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> CirculationResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| CirculationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: &Path) -> CirculationResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CirculationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> CirculationResult<String> {
        toml::to_string_pretty(self).map_err(|e| CirculationError::Config(e.to_string()))
    }

    pub fn validate(&self) -> CirculationResult<()> {
        if self.checkout_period_days <= 0 {
            return Err(CirculationError::Config(format!(
                "checkout_period_days must be positive, got {}",
                self.checkout_period_days
            )));
        }
        if self.fine_rate < 0 || self.max_fine < 0 {
            return Err(CirculationError::Config(
                "fine_rate and max_fine must not be negative".into(),
            ));
        }
        if self.lost_book_fine <= self.max_fine {
            return Err(CirculationError::Config(format!(
                "lost_book_fine ({}) must exceed max_fine ({})",
                self.lost_book_fine, self.max_fine
            )));
        }
        Ok(())
    }

    pub fn checkout_period(&self) -> Duration {
        Duration::days(self.checkout_period_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let c = CirculationConfig::default();
        assert_eq!(c.checkout_period_days, 14);
        assert_eq!(c.fine_rate, 5);
        assert_eq!(c.max_fine, 500);
        assert_eq!(c.lost_book_fine, 1000);
        assert!(c.validate().is_ok());
        assert_eq!(c.checkout_period(), Duration::days(14));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = CirculationConfig::from_toml_str("fine_rate = 10\n").unwrap();
        assert_eq!(c.fine_rate, 10);
        assert_eq!(c.max_fine, 500);
    }

    #[test]
    fn lost_fine_must_exceed_cap() {
        let err = CirculationConfig::from_toml_str("max_fine = 1000\n").unwrap_err();
        assert_eq!(err.kind(), "config");
        let err = CirculationConfig::from_toml_str("checkout_period_days = 0\n").unwrap_err();
        assert!(err.to_string().contains("checkout_period_days"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "checkout_period_days = 21\nlost_book_fine = 2000").unwrap();
        let c = CirculationConfig::load(file.path()).unwrap();
        assert_eq!(c.checkout_period_days, 21);
        assert_eq!(c.lost_book_fine, 2000);

        let round = CirculationConfig::from_toml_str(&c.to_toml_string().unwrap()).unwrap();
        assert_eq!(round, c);
    }
}
