//! Collaborators the engines read from and write to.
//!
//! Every method takes `&self`; implementations that mutate state own their
//! synchronization. The engines never cache what these return.

use crate::chart_of_accounts::ChartOfAccounts;
use crate::error::{DerivationError, Result};
use crate::schema::{
    Account, MonthlySales, Period, Projection, ProjectionMethod, RatioValue, Statement,
    StatementKey, StatementLine,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub trait CatalogWriter {
    fn find_account(&self, company_id: u64, code: &str) -> Result<Option<Account>>;

    fn load_catalog(&self, company_id: u64) -> Result<ChartOfAccounts>;

    /// Inserts the account, or replaces the one with the same code.
    fn upsert_account(&self, company_id: u64, account: Account) -> Result<()>;

    /// Removes the account if present. Used to undo a failed submission.
    fn remove_account(&self, company_id: u64, code: &str) -> Result<()>;
}

pub trait StatementLedger {
    fn read_lines(&self, key: &StatementKey) -> Result<Option<Vec<StatementLine>>>;

    /// Replaces every line of the statement in one step. Readers observe either
    /// the old set or the new one, never a mix.
    fn replace_lines(&self, key: StatementKey, lines: Vec<StatementLine>) -> Result<()>;

    fn read_statement(&self, key: StatementKey) -> Result<Option<Statement>> {
        Ok(self.read_lines(&key)?.map(|lines| Statement { key, lines }))
    }
}

pub trait ConceptAmountResolver {
    /// Sum of the statement amounts mapped to the concept. Unmapped concepts resolve to 0.
    fn concept_amount(&self, concept_id: u64, company_id: u64, period_id: u64) -> Result<f64>;
}

/// How a caller names a period: a raw id or a calendar year.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PeriodSelector {
    Id(u64),
    Year(i32),
}

impl PeriodSelector {
    /// Four-digit numbers are read as years, everything else as ids.
    pub fn from_raw(raw: u64) -> Self {
        if (1000..=9999).contains(&raw) {
            Self::Year(raw as i32)
        } else {
            Self::Id(raw)
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        raw.trim()
            .parse::<u64>()
            .map(Self::from_raw)
            .map_err(|_| {
                DerivationError::validation(
                    "period",
                    format!("'{}' is not a period id or year", raw),
                )
            })
    }
}

impl fmt::Display for PeriodSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "period id {}", id),
            Self::Year(year) => write!(f, "year {}", year),
        }
    }
}

pub trait PeriodRepository {
    fn find_by_id(&self, id: u64) -> Result<Option<Period>>;

    fn find_by_year(&self, year: i32) -> Result<Option<Period>>;

    fn resolve(&self, selector: PeriodSelector) -> Result<Period> {
        let found = match selector {
            PeriodSelector::Id(id) => self.find_by_id(id)?,
            PeriodSelector::Year(year) => self.find_by_year(year)?,
        };
        found.ok_or_else(|| DerivationError::PeriodNotFound(selector.to_string()))
    }

    /// The period one calendar year before `period`, if it exists.
    fn previous_year(&self, period: &Period) -> Result<Option<Period>> {
        self.find_by_year(period.year - 1)
    }
}

pub trait RatioValueSink {
    /// Upserts on (company, period, ratio).
    fn store_ratio_value(&self, value: RatioValue) -> Result<()>;
}

pub trait RatioValueSource {
    fn ratio_values(&self, ratio_id: u64, period_id: u64) -> Result<Vec<RatioValue>>;
}

pub trait SectorDirectory {
    fn companies_in_sector(&self, sector_id: u64) -> Result<Vec<u64>>;
}

pub trait SalesHistoryReader {
    fn monthly_sales(&self, company_id: u64) -> Result<Vec<MonthlySales>>;
}

pub trait ProjectionStore {
    fn find_projection(
        &self,
        company_id: u64,
        method: ProjectionMethod,
        target_year: i32,
    ) -> Result<Option<Projection>>;

    /// Saves the header and replaces all of its details atomically. A zero id
    /// asks the store to assign one. Returns the stored projection.
    fn save_projection(&self, projection: Projection) -> Result<Projection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_from_raw() {
        assert_eq!(PeriodSelector::from_raw(2024), PeriodSelector::Year(2024));
        assert_eq!(PeriodSelector::from_raw(3), PeriodSelector::Id(3));
        assert_eq!(PeriodSelector::from_raw(12345), PeriodSelector::Id(12345));
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(PeriodSelector::parse(" 2023 ").unwrap(), PeriodSelector::Year(2023));
        assert_eq!(PeriodSelector::parse("17").unwrap(), PeriodSelector::Id(17));
        assert!(PeriodSelector::parse("last-year").is_err());
    }
}
