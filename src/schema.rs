use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DerivationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    #[schemars(description = "Resources owned by the company (code category 1)")]
    Asset,

    #[schemars(description = "Obligations owed to creditors (code category 2)")]
    Liability,

    #[schemars(description = "Owner's residual interest (code category 3)")]
    Equity,

    #[schemars(description = "Income and other results (code categories 4 and 7)")]
    Income,

    #[schemars(description = "Costs and operating expenses (code categories 5 and 6)")]
    Expense,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementType {
    BalanceSheet,
    IncomeStatement,
    None,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementKind {
    Balance,
    IncomeStatement,
}

/// Business role of an account, set when the catalog is authored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountRole {
    #[schemars(
        description = "Income tax expense. Subtracted from pretax profit to derive net profit."
    )]
    TaxExpense,

    #[schemars(
        description = "The company reports its own net income for the period in this account. Net profit is not derived when present."
    )]
    NetIncomeOverride,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Account {
    #[schemars(
        description = "Dot-segmented hierarchical code (e.g. '1.1.01') or a 1-4 digit numeric code"
    )]
    pub code: String,

    pub name: String,

    pub account_type: AccountType,

    #[serde(default)]
    #[schemars(
        description = "True when the amount is derived by the engine and never entered directly"
    )]
    pub is_computed: bool,

    pub statement_type: StatementType,

    #[serde(default)]
    pub role: Option<AccountRole>,
}

impl Account {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        account_type: AccountType,
        statement_type: StatementType,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            account_type,
            is_computed: false,
            statement_type,
            role: None,
        }
    }

    pub fn with_role(mut self, role: AccountRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn computed(mut self) -> Self {
        self.is_computed = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct StatementLine {
    pub account_code: String,
    pub amount: f64,
    #[serde(default)]
    pub use_in_ratios: bool,
}

impl StatementLine {
    pub fn new(account_code: impl Into<String>, amount: f64) -> Self {
        Self {
            account_code: account_code.into(),
            amount,
            use_in_ratios: false,
        }
    }
}

/// Identifies one statement: a company, a period and a statement kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementKey {
    pub company_id: u64,
    pub period_id: u64,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Statement {
    pub key: StatementKey,
    pub lines: Vec<StatementLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Concept {
    pub id: u64,
    pub code: String,
    pub name: String,
}

/// A fiscal year.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct Period {
    pub id: u64,
    pub year: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentRole {
    Numerator,
    Denominator,
    Operand,
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numerator => write!(f, "NUMERATOR"),
            Self::Denominator => write!(f, "DENOMINATOR"),
            Self::Operand => write!(f, "OPERAND"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    #[default]
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RatioComponent {
    pub concept_id: u64,

    pub role: ComponentRole,

    #[schemars(
        description = "Position of the component inside its pool. Pools fold in ascending order."
    )]
    pub order: i32,

    #[serde(default)]
    #[schemars(
        description = "How the component combines with the running pool total. The first component of a pool seeds the total: ADD keeps its sign, SUB negates it."
    )]
    pub operation: Operation,

    #[serde(default)]
    #[schemars(
        description = "Optional scale applied to the resolved concept amount (e.g. 365 or 0.01)"
    )]
    pub factor: Option<f64>,

    #[serde(default)]
    #[schemars(
        description = "Average the current amount with the amount of the period one calendar year earlier"
    )]
    pub requires_averaging: bool,
}

/// Which side of the sector average counts as good for a ratio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
    #[schemars(description = "The healthier value is the one nearer to 1.0")]
    CloserToOne,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RatioDefinition {
    pub id: u64,
    pub code: String,
    pub name: String,
    pub category: String,
    #[schemars(description = "Human readable formula, informational only")]
    pub formula: String,
    #[serde(default)]
    pub numerator_multiplier: Option<f64>,
    #[serde(default)]
    pub denominator_multiplier: Option<f64>,
    #[serde(default)]
    pub result_multiplier: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub direction: Direction,
    pub components: Vec<RatioComponent>,
}

fn default_true() -> bool {
    true
}

impl RatioDefinition {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RatioDefinition)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueSource {
    Computed,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioValue {
    pub company_id: u64,
    pub period_id: u64,
    pub ratio_id: u64,
    pub value: f64,
    pub source: ValueSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct MonthlySales {
    pub company_id: u64,
    pub year: i32,
    pub month: u32,
    pub amount: f64,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMethod {
    #[schemars(description = "Linear regression over the historical months, extrapolated forward")]
    LeastSquares,

    #[schemars(description = "Chain the average month-over-month relative change")]
    PercentageGrowth,

    #[schemars(description = "Chain the average month-over-month absolute change")]
    AbsoluteGrowth,
}

impl ProjectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeastSquares => "least_squares",
            Self::PercentageGrowth => "percentage_growth",
            Self::AbsoluteGrowth => "absolute_growth",
        }
    }
}

impl fmt::Display for ProjectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectionMethod {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "least_squares" | "minimos_cuadrados" => Ok(Self::LeastSquares),
            "percentage_growth" | "incremento_porcentual" => Ok(Self::PercentageGrowth),
            "absolute_growth" | "incremento_absoluto" => Ok(Self::AbsoluteGrowth),
            other => Err(DerivationError::validation(
                "projection method",
                format!("unknown method '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ProjectionDetail {
    pub year: i32,
    pub month: u32,
    pub projected_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Projection {
    pub id: u64,
    pub company_id: u64,
    pub method: ProjectionMethod,
    pub target_year: i32,
    /// User that first generated this projection. Kept across regenerations.
    pub created_by: Option<u64>,
    /// Incremented every time the details are regenerated.
    pub revision: u32,
    pub details: Vec<ProjectionDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_definition_schema_generation() {
        let schema_json = RatioDefinition::schema_as_json().unwrap();
        assert!(schema_json.contains("components"));
        assert!(schema_json.contains("requires_averaging"));
        assert!(schema_json.contains("NUMERATOR"));
    }

    #[test]
    fn test_ratio_definition_from_json_defaults() {
        let json = r#"{
            "id": 1,
            "code": "LIQ_CORR",
            "name": "Current ratio",
            "category": "Liquidity",
            "formula": "Current Assets / Current Liabilities",
            "components": [
                { "concept_id": 1, "role": "NUMERATOR", "order": 1 },
                { "concept_id": 2, "role": "DENOMINATOR", "order": 1, "operation": "ADD" }
            ]
        }"#;

        let def = RatioDefinition::from_json(json).unwrap();
        assert!(def.active);
        assert!(!def.protected);
        assert_eq!(def.direction, Direction::HigherIsBetter);
        assert_eq!(def.numerator_multiplier, None);
        assert_eq!(def.components[0].operation, Operation::Add);
        assert_eq!(def.components[0].factor, None);
        assert!(!def.components[1].requires_averaging);
    }

    #[test]
    fn test_projection_method_parsing() {
        assert_eq!(
            "least_squares".parse::<ProjectionMethod>().unwrap(),
            ProjectionMethod::LeastSquares
        );
        assert_eq!(
            "incremento_porcentual".parse::<ProjectionMethod>().unwrap(),
            ProjectionMethod::PercentageGrowth
        );
        assert_eq!(
            " Absolute_Growth ".parse::<ProjectionMethod>().unwrap(),
            ProjectionMethod::AbsoluteGrowth
        );
        assert!("moving_average".parse::<ProjectionMethod>().is_err());
    }

    #[test]
    fn test_account_serialization() {
        let account = Account::new(
            "5.9",
            "Income tax",
            AccountType::Expense,
            StatementType::IncomeStatement,
        )
        .with_role(AccountRole::TaxExpense);
        let json = serde_json::to_string(&account).unwrap();
        assert!(json.contains("TAX_EXPENSE"));
        assert!(json.contains("INCOME_STATEMENT"));

        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }
}
