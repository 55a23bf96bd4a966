//! Session parameters for a tuning session.
//!
//! The accept thresholds are empirically chosen policy, so every one of them is a
//! field with a default rather than a constant in the engines.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::candidate::IndexMethod;
use crate::error::{AdvisorError, Result};

/// Configuration for one tuning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Target timeout for the whole session, in seconds
    pub timeout_secs: u64,
    /// Share of the timeout the iteration controller may spend before it stops
    pub budget_fraction: f64,
    /// An ADD is accepted when the workload total drops below `(1 - threshold) * baseline`
    pub global_improvement_threshold: f64,
    /// An ADD is also accepted when one query reaches `factor * baseline` (and the total improves)
    pub per_query_improvement_factor: f64,
    /// A DROP is rejected when one query reaches `baseline / factor`
    pub per_query_regression_factor: f64,
    /// Catalog schema to inspect
    pub schema: String,
    /// Index methods to enumerate
    pub methods: Vec<IndexMethod>,
    /// Widest candidate to enumerate (1..=3 columns)
    pub max_columns: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            budget_fraction: 0.7,
            global_improvement_threshold: 0.1,
            per_query_improvement_factor: 0.5,
            per_query_regression_factor: 0.5,
            schema: "public".to_string(),
            methods: vec![IndexMethod::Btree, IndexMethod::Brin, IndexMethod::Hash],
            max_columns: 3,
        }
    }
}

impl AdvisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sub-second remainders round up to the next whole second.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self
    }

    pub fn with_budget_fraction(mut self, fraction: f64) -> Self {
        self.budget_fraction = fraction;
        self
    }

    pub fn with_global_improvement_threshold(mut self, threshold: f64) -> Self {
        self.global_improvement_threshold = threshold;
        self
    }

    pub fn with_per_query_improvement_factor(mut self, factor: f64) -> Self {
        self.per_query_improvement_factor = factor;
        self
    }

    pub fn with_per_query_regression_factor(mut self, factor: f64) -> Self {
        self.per_query_regression_factor = factor;
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_methods(mut self, methods: Vec<IndexMethod>) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_max_columns(mut self, max_columns: usize) -> Self {
        self.max_columns = max_columns;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Time the iteration controller may spend before it stops starting new rounds.
    pub fn deadline_budget(&self) -> Duration {
        self.timeout().mul_f64(self.budget_fraction)
    }

    /// Check every field against its legal range.
    pub fn validate(&self) -> Result<()> {
        fn unit_interval(name: &str, value: f64) -> Result<()> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(AdvisorError::Config(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )))
            }
        }

        if self.timeout_secs == 0 {
            return Err(AdvisorError::Config("timeout_secs must be at least 1".to_string()));
        }
        unit_interval("budget_fraction", self.budget_fraction)?;
        unit_interval("per_query_improvement_factor", self.per_query_improvement_factor)?;
        unit_interval("per_query_regression_factor", self.per_query_regression_factor)?;

        if !(0.0..1.0).contains(&self.global_improvement_threshold) {
            return Err(AdvisorError::Config(format!(
                "global_improvement_threshold must be in [0, 1), got {}",
                self.global_improvement_threshold
            )));
        }
        if !(1..=3).contains(&self.max_columns) {
            return Err(AdvisorError::Config(format!(
                "max_columns must be between 1 and 3, got {}",
                self.max_columns
            )));
        }
        if self.methods.is_empty() {
            return Err(AdvisorError::Config("methods must not be empty".to_string()));
        }
        if let Some(method) = self.methods.iter().find(|m| !m.is_candidate_method()) {
            return Err(AdvisorError::Config(format!(
                "index method {} cannot be proposed",
                method
            )));
        }
        if self.schema.trim().is_empty() {
            return Err(AdvisorError::Config("schema must not be empty".to_string()));
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take their defaults.
    #[cfg(feature = "json")]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AdvisorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "json")]
    pub async fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AdvisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.global_improvement_threshold, 0.1);
        assert_eq!(config.per_query_improvement_factor, 0.5);
        assert_eq!(config.per_query_regression_factor, 0.5);
        assert_eq!(config.budget_fraction, 0.7);
        assert_eq!(config.max_columns, 3);
    }

    #[test]
    fn test_deadline_budget() {
        let config = AdvisorConfig::new().with_timeout(Duration::from_secs(100));
        assert_eq!(config.deadline_budget(), Duration::from_secs(70));
    }

    #[test]
    fn test_sub_second_timeout_rounds_up() {
        let config = AdvisorConfig::new().with_timeout(Duration::from_millis(900));
        assert_eq!(config.timeout_secs, 1);
        assert!(config.validate().is_ok());

        let config = AdvisorConfig::new().with_timeout(Duration::from_millis(2500));
        assert_eq!(config.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        assert!(AdvisorConfig::new().with_timeout(Duration::ZERO).validate().is_err());
        assert!(AdvisorConfig::new().with_budget_fraction(0.0).validate().is_err());
        assert!(AdvisorConfig::new().with_budget_fraction(1.5).validate().is_err());
        assert!(AdvisorConfig::new().with_per_query_regression_factor(0.0).validate().is_err());
        assert!(AdvisorConfig::new().with_global_improvement_threshold(1.0).validate().is_err());
        assert!(AdvisorConfig::new().with_max_columns(4).validate().is_err());
        assert!(AdvisorConfig::new().with_max_columns(0).validate().is_err());
        assert!(AdvisorConfig::new().with_methods(vec![]).validate().is_err());
        assert!(AdvisorConfig::new().with_methods(vec![IndexMethod::Gin]).validate().is_err());
        assert!(AdvisorConfig::new().with_schema(" ").validate().is_err());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_from_json_fills_defaults() {
        let config = AdvisorConfig::from_json_str(
            r#"{"timeout_secs": 60, "methods": ["btree"], "schema": "sales"}"#,
        )
        .unwrap();

        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.methods, vec![IndexMethod::Btree]);
        assert_eq!(config.schema, "sales");
        assert_eq!(config.budget_fraction, 0.7);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_from_json_validates() {
        let err = AdvisorConfig::from_json_str(r#"{"max_columns": 5}"#).unwrap_err();
        assert!(matches!(err, AdvisorError::Config(_)));

        let err = AdvisorConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, AdvisorError::Json(_)));
    }
}
