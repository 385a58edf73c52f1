use crate::error::{DerivationError, Result};
use crate::utils::parse_month_string;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What to do when a ratio has no DENOMINATOR component at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DenominatorPolicy {
    #[schemars(
        description = "An empty denominator pool totals 0 and the ratio fails with a division by zero"
    )]
    #[default]
    FailFast,

    #[schemars(
        description = "Legacy compatibility: an empty denominator pool is treated as 1.0. A denominator that resolves to zero still fails."
    )]
    DefaultToOne,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaxDetection {
    #[schemars(description = "Only accounts with the TAX_EXPENSE role count as taxes")]
    RoleOnly,

    #[schemars(
        description = "Accounts with the TAX_EXPENSE role, plus role-less accounts whose name mentions tax"
    )]
    #[default]
    RoleOrName,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetIncomeDetection {
    #[schemars(
        description = "Only an account with the NET_INCOME_OVERRIDE role suppresses the derived net profit"
    )]
    RoleOnly,

    #[schemars(
        description = "The NET_INCOME_OVERRIDE role, or an account name mentioning both profit and period"
    )]
    #[default]
    RoleOrName,
}

/// Restricts which historical months feed a projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
pub struct HistoryWindow {
    #[serde(default)]
    #[schemars(description = "First month to include, YYYY-MM")]
    pub base_start: Option<String>,

    #[serde(default)]
    #[schemars(description = "Last month to include, YYYY-MM")]
    pub base_end: Option<String>,

    #[serde(default)]
    #[schemars(description = "Keep only the most recent N months after applying the bounds")]
    pub months: Option<usize>,
}

impl HistoryWindow {
    pub fn validate(&self) -> Result<()> {
        let start = self.base_start.as_deref().map(parse_month_string).transpose()?;
        let end = self.base_end.as_deref().map(parse_month_string).transpose()?;

        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(DerivationError::InvalidConfig(format!(
                    "history window ends ({}) before it starts ({})",
                    end.format("%Y-%m"),
                    start.format("%Y-%m")
                )));
            }
        }

        if self.months == Some(0) {
            return Err(DerivationError::InvalidConfig(
                "history window must keep at least one month".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct EngineConfig {
    #[serde(default = "default_division_epsilon")]
    #[schemars(description = "Divisors with a smaller magnitude are treated as zero")]
    pub division_epsilon: f64,

    #[serde(default)]
    pub denominator_policy: DenominatorPolicy,

    #[serde(default = "default_growth_epsilon")]
    #[schemars(description = "Floor for the previous month when computing relative growth")]
    pub growth_epsilon: f64,

    #[serde(default = "default_regression_epsilon")]
    pub regression_epsilon: f64,

    #[serde(default)]
    pub tax_detection: TaxDetection,

    #[serde(default)]
    pub net_income_detection: NetIncomeDetection,

    #[serde(default)]
    pub history: HistoryWindow,
}

fn default_division_epsilon() -> f64 {
    1e-9
}

fn default_growth_epsilon() -> f64 {
    1e-6
}

fn default_regression_epsilon() -> f64 {
    1e-12
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            division_epsilon: default_division_epsilon(),
            denominator_policy: DenominatorPolicy::default(),
            growth_epsilon: default_growth_epsilon(),
            regression_epsilon: default_regression_epsilon(),
            tax_detection: TaxDetection::default(),
            net_income_detection: NetIncomeDetection::default(),
            history: HistoryWindow::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("division_epsilon", self.division_epsilon),
            ("growth_epsilon", self.growth_epsilon),
            ("regression_epsilon", self.regression_epsilon),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(DerivationError::InvalidConfig(format!(
                    "{} must be a positive finite number, got {}",
                    name, value
                )));
            }
        }

        self.history.validate()
    }
}
