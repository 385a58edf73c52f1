//! In-process implementation of every collaborator port.

use crate::chart_of_accounts::ChartOfAccounts;
use crate::error::{DerivationError, Result};
use crate::ports::{
    CatalogWriter, ConceptAmountResolver, PeriodRepository, ProjectionStore, RatioValueSink,
    RatioValueSource, SalesHistoryReader, SectorDirectory, StatementLedger,
};
use crate::schema::{
    Account, MonthlySales, Period, Projection, ProjectionMethod, RatioValue, StatementKey,
    StatementLine,
};
use crate::utils::validate_month;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    catalogs: Mutex<BTreeMap<u64, ChartOfAccounts>>,
    statements: Mutex<BTreeMap<StatementKey, Vec<StatementLine>>>,
    // (company, concept) -> account codes
    concept_mappings: Mutex<BTreeMap<(u64, u64), BTreeSet<String>>>,
    periods: Mutex<Vec<Period>>,
    ratio_values: Mutex<BTreeMap<(u64, u64, u64), RatioValue>>,
    sectors: Mutex<BTreeMap<u64, u64>>,
    sales: Mutex<BTreeMap<(u64, i32, u32), MonthlySales>>,
    projections: Mutex<Vec<Projection>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| DerivationError::Collaborator("in-memory store lock poisoned".to_string()))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_accounts(&self, company_id: u64, accounts: Vec<Account>) -> Result<()> {
        let chart = ChartOfAccounts::from_accounts(company_id, accounts)?;
        lock(&self.catalogs)?.insert(company_id, chart);
        Ok(())
    }

    pub fn map_concept(&self, company_id: u64, concept_id: u64, account_code: &str) -> Result<()> {
        lock(&self.concept_mappings)?
            .entry((company_id, concept_id))
            .or_default()
            .insert(account_code.to_string());
        Ok(())
    }

    pub fn add_period(&self, period: Period) -> Result<()> {
        let mut periods = lock(&self.periods)?;
        if periods.iter().any(|p| p.id == period.id || p.year == period.year) {
            return Err(DerivationError::validation(
                "period",
                format!("period {} / year {} already exists", period.id, period.year),
            ));
        }
        periods.push(period);
        Ok(())
    }

    pub fn assign_sector(&self, company_id: u64, sector_id: u64) -> Result<()> {
        lock(&self.sectors)?.insert(company_id, sector_id);
        Ok(())
    }

    /// Records one month of sales, replacing any previous amount for the same month.
    pub fn record_sales(&self, sales: MonthlySales) -> Result<()> {
        validate_month(sales.month)?;
        lock(&self.sales)?.insert((sales.company_id, sales.year, sales.month), sales);
        Ok(())
    }

    pub fn projections(&self) -> Result<Vec<Projection>> {
        Ok(lock(&self.projections)?.clone())
    }

    pub fn ratio_value(
        &self,
        company_id: u64,
        period_id: u64,
        ratio_id: u64,
    ) -> Result<Option<RatioValue>> {
        Ok(lock(&self.ratio_values)?
            .get(&(company_id, period_id, ratio_id))
            .cloned())
    }
}

impl CatalogWriter for InMemoryStore {
    fn find_account(&self, company_id: u64, code: &str) -> Result<Option<Account>> {
        Ok(lock(&self.catalogs)?
            .get(&company_id)
            .and_then(|chart| chart.get(code))
            .cloned())
    }

    fn load_catalog(&self, company_id: u64) -> Result<ChartOfAccounts> {
        Ok(lock(&self.catalogs)?
            .get(&company_id)
            .cloned()
            .unwrap_or_else(|| ChartOfAccounts::new(company_id)))
    }

    fn upsert_account(&self, company_id: u64, account: Account) -> Result<()> {
        lock(&self.catalogs)?
            .entry(company_id)
            .or_insert_with(|| ChartOfAccounts::new(company_id))
            .insert(account);
        Ok(())
    }

    fn remove_account(&self, company_id: u64, code: &str) -> Result<()> {
        if let Some(chart) = lock(&self.catalogs)?.get_mut(&company_id) {
            chart.remove(code);
        }
        Ok(())
    }
}

impl StatementLedger for InMemoryStore {
    fn read_lines(&self, key: &StatementKey) -> Result<Option<Vec<StatementLine>>> {
        Ok(lock(&self.statements)?.get(key).cloned())
    }

    fn replace_lines(&self, key: StatementKey, lines: Vec<StatementLine>) -> Result<()> {
        let mut seen = BTreeSet::new();
        for line in &lines {
            if !seen.insert(line.account_code.as_str()) {
                return Err(DerivationError::validation(
                    format!("statement {:?}", key),
                    format!("more than one line for account '{}'", line.account_code),
                ));
            }
        }
        lock(&self.statements)?.insert(key, lines);
        Ok(())
    }
}

impl ConceptAmountResolver for InMemoryStore {
    fn concept_amount(&self, concept_id: u64, company_id: u64, period_id: u64) -> Result<f64> {
        let mappings = lock(&self.concept_mappings)?;
        let Some(codes) = mappings.get(&(company_id, concept_id)) else {
            return Ok(0.0);
        };

        let statements = lock(&self.statements)?;
        let total = statements
            .iter()
            .filter(|(key, _)| key.company_id == company_id && key.period_id == period_id)
            .flat_map(|(_, lines)| lines.iter())
            .filter(|line| codes.contains(&line.account_code))
            .map(|line| line.amount)
            .sum();
        Ok(total)
    }
}

impl PeriodRepository for InMemoryStore {
    fn find_by_id(&self, id: u64) -> Result<Option<Period>> {
        Ok(lock(&self.periods)?.iter().find(|p| p.id == id).cloned())
    }

    fn find_by_year(&self, year: i32) -> Result<Option<Period>> {
        Ok(lock(&self.periods)?.iter().find(|p| p.year == year).cloned())
    }
}

impl RatioValueSink for InMemoryStore {
    fn store_ratio_value(&self, value: RatioValue) -> Result<()> {
        let key = (value.company_id, value.period_id, value.ratio_id);
        lock(&self.ratio_values)?.insert(key, value);
        Ok(())
    }
}

impl RatioValueSource for InMemoryStore {
    fn ratio_values(&self, ratio_id: u64, period_id: u64) -> Result<Vec<RatioValue>> {
        Ok(lock(&self.ratio_values)?
            .values()
            .filter(|v| v.ratio_id == ratio_id && v.period_id == period_id)
            .cloned()
            .collect())
    }
}

impl SectorDirectory for InMemoryStore {
    fn companies_in_sector(&self, sector_id: u64) -> Result<Vec<u64>> {
        Ok(lock(&self.sectors)?
            .iter()
            .filter(|(_, sector)| **sector == sector_id)
            .map(|(company, _)| *company)
            .collect())
    }
}

impl SalesHistoryReader for InMemoryStore {
    fn monthly_sales(&self, company_id: u64) -> Result<Vec<MonthlySales>> {
        Ok(lock(&self.sales)?
            .values()
            .filter(|s| s.company_id == company_id)
            .cloned()
            .collect())
    }
}

impl ProjectionStore for InMemoryStore {
    fn find_projection(
        &self,
        company_id: u64,
        method: ProjectionMethod,
        target_year: i32,
    ) -> Result<Option<Projection>> {
        Ok(lock(&self.projections)?
            .iter()
            .find(|p| {
                p.company_id == company_id && p.method == method && p.target_year == target_year
            })
            .cloned())
    }

    fn save_projection(&self, mut projection: Projection) -> Result<Projection> {
        let mut projections = lock(&self.projections)?;

        let existing = projections.iter().position(|p| {
            p.company_id == projection.company_id
                && p.method == projection.method
                && p.target_year == projection.target_year
        });

        match existing {
            Some(idx) => {
                projection.id = projections[idx].id;
                projections[idx] = projection.clone();
            }
            None => {
                projection.id = projections.iter().map(|p| p.id).max().unwrap_or(0) + 1;
                projections.push(projection.clone());
            }
        }

        Ok(projection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AccountType, StatementKind, StatementType};
    use chrono::NaiveDate;

    fn period(id: u64, year: i32) -> Period {
        Period {
            id,
            year,
            start_date: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
        }
    }

    #[test]
    fn test_concept_amount_sums_mapped_accounts() {
        let store = InMemoryStore::new();
        let key = StatementKey {
            company_id: 1,
            period_id: 10,
            kind: StatementKind::Balance,
        };
        store
            .replace_lines(
                key,
                vec![
                    StatementLine::new("1.1.01", 100.0),
                    StatementLine::new("1.1.02", 50.0),
                    StatementLine::new("2.1.01", 70.0),
                ],
            )
            .unwrap();
        store.map_concept(1, 5, "1.1.01").unwrap();
        store.map_concept(1, 5, "1.1.02").unwrap();

        assert_eq!(store.concept_amount(5, 1, 10).unwrap(), 150.0);
        assert_eq!(store.concept_amount(6, 1, 10).unwrap(), 0.0);
        assert_eq!(store.concept_amount(5, 1, 11).unwrap(), 0.0);
    }

    #[test]
    fn test_replace_lines_rejects_duplicate_accounts() {
        let store = InMemoryStore::new();
        let key = StatementKey {
            company_id: 1,
            period_id: 1,
            kind: StatementKind::IncomeStatement,
        };
        store.replace_lines(key, vec![StatementLine::new("4", 10.0)]).unwrap();

        let result = store.replace_lines(
            key,
            vec![StatementLine::new("4", 10.0), StatementLine::new("4", 20.0)],
        );
        assert!(result.is_err());
        assert_eq!(store.read_lines(&key).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_period_resolution() {
        let store = InMemoryStore::new();
        store.add_period(period(1, 2023)).unwrap();
        store.add_period(period(2, 2024)).unwrap();
        assert!(store.add_period(period(3, 2024)).is_err());

        let current = store.resolve(crate::ports::PeriodSelector::Year(2024)).unwrap();
        assert_eq!(current.id, 2);
        assert_eq!(store.previous_year(&current).unwrap().unwrap().id, 1);

        let first = store.find_by_id(1).unwrap().unwrap();
        assert!(store.previous_year(&first).unwrap().is_none());
        assert!(store.resolve(crate::ports::PeriodSelector::Id(99)).is_err());
    }

    #[test]
    fn test_upsert_account_creates_catalog() {
        let store = InMemoryStore::new();
        store
            .upsert_account(
                9,
                Account::new("1", "ASSETS", AccountType::Asset, StatementType::BalanceSheet)
                    .computed(),
            )
            .unwrap();
        let found = store.find_account(9, "1").unwrap().unwrap();
        assert!(found.is_computed);
        assert_eq!(store.load_catalog(9).unwrap().len(), 1);
        assert!(store.load_catalog(10).unwrap().is_empty());
    }

    #[test]
    fn test_record_sales_is_unique_per_month() {
        let store = InMemoryStore::new();
        for amount in [100.0, 250.0] {
            store
                .record_sales(MonthlySales {
                    company_id: 1,
                    year: 2024,
                    month: 3,
                    amount,
                })
                .unwrap();
        }
        let sales = store.monthly_sales(1).unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].amount, 250.0);

        let invalid = store.record_sales(MonthlySales {
            company_id: 1,
            year: 2024,
            month: 13,
            amount: 1.0,
        });
        assert!(invalid.is_err());
    }
}
