//! Vertical and horizontal balance sheet analysis over stored statements.

use crate::chart_of_accounts::{ChartOfAccounts, CodeLevel};
use crate::error::{DerivationError, Result};
use crate::ports::{CatalogWriter, StatementLedger};
use crate::schema::{
    Account, AccountType, StatementKey, StatementKind, StatementLine, StatementType,
};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Section {
    Assets,
    Liabilities,
    Equity,
}

impl Section {
    pub fn of(account_type: AccountType) -> Option<Self> {
        match account_type {
            AccountType::Asset => Some(Self::Assets),
            AccountType::Liability => Some(Self::Liabilities),
            AccountType::Equity => Some(Self::Equity),
            AccountType::Income | AccountType::Expense => None,
        }
    }

    fn root_codes(&self) -> [&'static str; 2] {
        match self {
            Self::Assets => ["1000", "1"],
            Self::Liabilities => ["2000", "2"],
            Self::Equity => ["3000", "3"],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelFilter {
    #[default]
    All,
    Mayor,
    SubMayor,
    /// Detail lines only, without section roots or computed accounts.
    Detalle,
}

impl LevelFilter {
    fn admits(&self, account: &Account, level: CodeLevel) -> bool {
        match self {
            Self::All => true,
            Self::Mayor => level == CodeLevel::Mayor,
            Self::SubMayor => level == CodeLevel::SubMayor,
            Self::Detalle => {
                level == CodeLevel::Detalle
                    && !matches!(account.code.as_str(), "1000" | "2000" | "3000")
                    && !account.is_computed
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SectionTotals {
    pub assets: f64,
    pub liabilities: f64,
    pub equity: f64,
}

impl SectionTotals {
    pub fn from_lines(lines: &[StatementLine]) -> Self {
        let mut totals = Self::default();
        for line in lines {
            let code = line.account_code.trim();
            for section in [Section::Assets, Section::Liabilities, Section::Equity] {
                if section.root_codes().contains(&code) {
                    *totals.slot(section) = line.amount;
                }
            }
        }
        totals
    }

    pub fn get(&self, section: Section) -> f64 {
        match section {
            Section::Assets => self.assets,
            Section::Liabilities => self.liabilities,
            Section::Equity => self.equity,
        }
    }

    fn slot(&mut self, section: Section) -> &mut f64 {
        match section {
            Section::Assets => &mut self.assets,
            Section::Liabilities => &mut self.liabilities,
            Section::Equity => &mut self.equity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerticalLine {
    pub code: String,
    pub name: String,
    pub section: Section,
    pub level: CodeLevel,
    pub amount: f64,
    pub denominator: f64,
    /// `None` when the section total is zero.
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerticalAnalysis {
    pub totals: SectionTotals,
    pub lines: Vec<VerticalLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HorizontalLine {
    pub code: String,
    pub name: String,
    pub section: Section,
    pub level: CodeLevel,
    pub base_amount: f64,
    pub compared_amount: f64,
    pub absolute_change: f64,
    /// `None` when the base amount is zero.
    pub relative_change: Option<f64>,
}

/// Balance sheet lines joined with their catalog account, filtered by level.
fn classified<'c>(
    lines: &[StatementLine],
    catalog: &'c ChartOfAccounts,
    level_filter: LevelFilter,
) -> Vec<(&'c Account, Section, CodeLevel, f64)> {
    lines
        .iter()
        .filter_map(|line| {
            let account = catalog.get(line.account_code.trim())?;
            if account.statement_type != StatementType::BalanceSheet {
                return None;
            }
            let section = Section::of(account.account_type)?;
            let level = CodeLevel::classify(&account.code);
            level_filter
                .admits(account, level)
                .then_some((account, section, level, line.amount))
        })
        .collect()
}

pub fn vertical_analysis(
    lines: &[StatementLine],
    catalog: &ChartOfAccounts,
    section_filter: Option<Section>,
    level_filter: LevelFilter,
) -> VerticalAnalysis {
    let totals = SectionTotals::from_lines(lines);

    let mut rows: Vec<VerticalLine> = classified(lines, catalog, level_filter)
        .into_iter()
        .filter(|(_, section, _, _)| section_filter.map_or(true, |wanted| wanted == *section))
        .map(|(account, section, level, amount)| {
            let denominator = totals.get(section);
            VerticalLine {
                code: account.code.clone(),
                name: account.name.clone(),
                section,
                level,
                amount,
                denominator,
                percentage: (denominator != 0.0).then(|| amount / denominator),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.code.cmp(&b.code));

    VerticalAnalysis { totals, lines: rows }
}

pub fn horizontal_analysis(
    base: &[StatementLine],
    compared: &[StatementLine],
    catalog: &ChartOfAccounts,
    level_filter: LevelFilter,
) -> Vec<HorizontalLine> {
    // code -> (account, section, level, base, compared)
    let mut joined: BTreeMap<&str, (&Account, Section, CodeLevel, f64, f64)> = BTreeMap::new();
    for (account, section, level, amount) in classified(base, catalog, level_filter) {
        joined
            .entry(account.code.as_str())
            .or_insert((account, section, level, 0.0, 0.0))
            .3 = amount;
    }
    for (account, section, level, amount) in classified(compared, catalog, level_filter) {
        joined
            .entry(account.code.as_str())
            .or_insert((account, section, level, 0.0, 0.0))
            .4 = amount;
    }

    joined
        .into_values()
        .map(|(account, section, level, base_amount, compared_amount)| {
            let absolute_change = compared_amount - base_amount;
            HorizontalLine {
                code: account.code.clone(),
                name: account.name.clone(),
                section,
                level,
                base_amount,
                compared_amount,
                absolute_change,
                relative_change: (base_amount != 0.0).then(|| absolute_change / base_amount),
            }
        })
        .collect()
}

/// Runs the analyses against stored balance statements.
pub struct BalanceAnalyzer<'a, C: ?Sized, L: ?Sized> {
    catalog: &'a C,
    ledger: &'a L,
}

impl<'a, C, L> BalanceAnalyzer<'a, C, L>
where
    C: CatalogWriter + ?Sized,
    L: StatementLedger + ?Sized,
{
    pub fn new(catalog: &'a C, ledger: &'a L) -> Self {
        Self { catalog, ledger }
    }

    fn balance_lines(&self, company_id: u64, period_id: u64) -> Result<Vec<StatementLine>> {
        let key = StatementKey {
            company_id,
            period_id,
            kind: StatementKind::Balance,
        };
        self.ledger.read_lines(&key)?.ok_or_else(|| {
            DerivationError::validation(
                "balance analysis",
                format!("no balance statement for company {} in period {}", company_id, period_id),
            )
        })
    }

    pub fn vertical(
        &self,
        company_id: u64,
        period_id: u64,
        section_filter: Option<Section>,
        level_filter: LevelFilter,
    ) -> Result<VerticalAnalysis> {
        info!("Vertical analysis for company {} in period {}", company_id, period_id);
        let lines = self.balance_lines(company_id, period_id)?;
        let catalog = self.catalog.load_catalog(company_id)?;
        Ok(vertical_analysis(&lines, &catalog, section_filter, level_filter))
    }

    pub fn horizontal(
        &self,
        company_id: u64,
        base_period_id: u64,
        compared_period_id: u64,
        level_filter: LevelFilter,
    ) -> Result<Vec<HorizontalLine>> {
        info!(
            "Horizontal analysis for company {}: period {} against {}",
            company_id, compared_period_id, base_period_id
        );
        let base = self.balance_lines(company_id, base_period_id)?;
        let compared = self.balance_lines(company_id, compared_period_id)?;
        let catalog = self.catalog.load_catalog(company_id)?;
        Ok(horizontal_analysis(&base, &compared, &catalog, level_filter))
    }
}
