use crate::chart_of_accounts::{
    ancestor_codes, depth, infer_category, inferred_account, is_direct_child, leading_digit,
    ChartOfAccounts,
};
use crate::config::{EngineConfig, NetIncomeDetection, TaxDetection};
use crate::error::{DerivationError, Result};
use crate::ports::{CatalogWriter, StatementLedger};
use crate::schema::{Account, AccountRole, AccountType, StatementKey, StatementLine, StatementType};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const GROSS_PROFIT_CODE: &str = "8.1";
pub const OPERATING_PROFIT_CODE: &str = "8.2";
pub const PRETAX_PROFIT_CODE: &str = "8.3";
pub const NET_PROFIT_CODE: &str = "8.4";

const DERIVED_CODES: [&str; 4] = [
    GROSS_PROFIT_CODE,
    OPERATING_PROFIT_CODE,
    PRETAX_PROFIT_CODE,
    NET_PROFIT_CODE,
];

fn is_derived_or_below(code: &str) -> bool {
    DERIVED_CODES
        .iter()
        .any(|derived| code == *derived || ancestor_codes(code).iter().any(|a| a == derived))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOrigin {
    /// Entered directly by the user
    Leaf,
    /// Sum of the direct children of a dotted code
    Ancestor,
    /// Income statement sub-total (gross, operating, pretax or net profit)
    Derived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedEntry {
    pub account: Account,
    pub amount: f64,
    pub use_in_ratios: bool,
    pub origin: EntryOrigin,
}

impl AggregatedEntry {
    pub fn to_line(&self) -> StatementLine {
        StatementLine {
            account_code: self.account.code.clone(),
            amount: self.amount,
            use_in_ratios: self.use_in_ratios,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeMetrics {
    pub income: f64,
    pub cost_of_sales: f64,
    pub operating_expenses: f64,
    pub other_results: f64,
    pub taxes: f64,
    pub gross_profit: f64,
    pub operating_profit: f64,
    pub pretax_profit: f64,
    pub net_profit: f64,
    /// False when the catalog already carries the company's own net income account.
    pub net_profit_materialized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationOutcome {
    pub entries: Vec<AggregatedEntry>,
    /// Computed accounts the catalog does not have yet.
    pub materialize: Vec<Account>,
    pub metrics: Option<IncomeMetrics>,
}

impl AggregationOutcome {
    pub fn lines(&self) -> Vec<StatementLine> {
        self.entries.iter().map(AggregatedEntry::to_line).collect()
    }

    pub fn amount_of(&self, code: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.account.code == code)
            .map(|e| e.amount)
    }
}

/// Rolls leaf balances up the dotted account tree and derives income statement sub-totals.
pub struct AccountAggregator {
    tax_detection: TaxDetection,
    net_income_detection: NetIncomeDetection,
}

impl AccountAggregator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tax_detection: config.tax_detection,
            net_income_detection: config.net_income_detection,
        }
    }

    /// Pure aggregation: reads the catalog, never writes it.
    ///
    /// Leaves whose code is not in the catalog still take part in the sums and are
    /// described with an account inferred from their leading digit.
    pub fn aggregate(
        &self,
        leaves: &[StatementLine],
        catalog: &ChartOfAccounts,
    ) -> Result<AggregationOutcome> {
        let mut amounts: BTreeMap<String, f64> = BTreeMap::new();
        for leaf in leaves {
            let code = leaf.account_code.trim();
            if code.is_empty() {
                return Err(DerivationError::validation(
                    "statement leaves",
                    "a line has an empty account code",
                ));
            }
            if !leaf.amount.is_finite() {
                return Err(DerivationError::validation(
                    "statement leaves",
                    format!("amount of '{}' is not a finite number", code),
                ));
            }
            if amounts.insert(code.to_string(), leaf.amount).is_some() {
                return Err(DerivationError::validation(
                    "statement leaves",
                    format!("account '{}' appears more than once", code),
                ));
            }
        }

        let is_income_statement = amounts
            .keys()
            .any(|code| matches!(leading_digit(code), Some(4..=7)));
        if is_income_statement {
            if let Some(code) = amounts.keys().find(|code| is_derived_or_below(code)) {
                return Err(DerivationError::validation(
                    "statement leaves",
                    format!("account '{}' falls under a derived profit sub-total", code),
                ));
            }
        }

        let mut ancestors: Vec<String> = amounts
            .keys()
            .flat_map(|code| ancestor_codes(code))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        // Deepest first so a grandparent sums already computed parents.
        ancestors.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));

        let mut computed: BTreeMap<String, f64> = BTreeMap::new();
        for ancestor in &ancestors {
            let total: f64 = amounts
                .iter()
                .filter(|(code, _)| is_direct_child(code, ancestor))
                .map(|(_, amount)| *amount)
                .sum();
            debug!("Ancestor {} aggregates to {}", ancestor, total);
            computed.insert(ancestor.clone(), total);
            // A computed amount shadows a leaf entered for the same code.
            amounts.insert(ancestor.clone(), total);
        }

        let mut materialize = Vec::new();
        let mut computed_entries = Vec::new();
        for (code, amount) in &computed {
            let account = match catalog.get(code) {
                Some(existing) => existing.clone(),
                None => {
                    let account = inferred_account(code);
                    materialize.push(account.clone());
                    account
                }
            };
            computed_entries.push(AggregatedEntry {
                account,
                amount: *amount,
                use_in_ratios: false,
                origin: EntryOrigin::Ancestor,
            });
        }

        let metrics = if is_income_statement {
            let metrics = self.income_metrics(leaves, &amounts, &computed, catalog);
            let mut derived = vec![
                (GROSS_PROFIT_CODE, "Gross Profit", metrics.gross_profit),
                (OPERATING_PROFIT_CODE, "Operating Profit", metrics.operating_profit),
                (PRETAX_PROFIT_CODE, "Pretax Profit", metrics.pretax_profit),
            ];
            if metrics.net_profit_materialized {
                derived.push((NET_PROFIT_CODE, "Net Profit", metrics.net_profit));
            } else {
                debug!("Catalog carries its own net income account; net profit is not derived");
            }

            for (code, name, amount) in derived {
                let account = match catalog.get(code) {
                    Some(existing) => existing.clone(),
                    None => {
                        let account = Account::new(
                            code,
                            name,
                            AccountType::Income,
                            StatementType::IncomeStatement,
                        )
                        .computed();
                        materialize.push(account.clone());
                        account
                    }
                };
                computed.insert(code.to_string(), amount);
                computed_entries.push(AggregatedEntry {
                    account,
                    amount,
                    use_in_ratios: false,
                    origin: EntryOrigin::Derived,
                });
            }
            Some(metrics)
        } else {
            None
        };

        let mut entries: Vec<AggregatedEntry> = leaves
            .iter()
            .filter(|leaf| !computed.contains_key(leaf.account_code.trim()))
            .map(|leaf| {
                let code = leaf.account_code.trim();
                let account = catalog.get(code).cloned().unwrap_or_else(|| {
                    let (account_type, statement_type) = infer_category(code);
                    Account::new(code, code, account_type, statement_type)
                });
                AggregatedEntry {
                    account,
                    amount: leaf.amount,
                    use_in_ratios: leaf.use_in_ratios,
                    origin: EntryOrigin::Leaf,
                }
            })
            .collect();
        computed_entries.sort_by(|a, b| a.account.code.cmp(&b.account.code));
        entries.extend(computed_entries);

        Ok(AggregationOutcome {
            entries,
            materialize,
            metrics,
        })
    }

    fn income_metrics(
        &self,
        leaves: &[StatementLine],
        amounts: &BTreeMap<String, f64>,
        computed: &BTreeMap<String, f64>,
        catalog: &ChartOfAccounts,
    ) -> IncomeMetrics {
        let category_total = |digit: u32| -> f64 {
            let root = digit.to_string();
            if let Some(total) = computed.get(&root) {
                return *total;
            }
            amounts
                .iter()
                .filter(|(code, _)| code.as_str() != root && leading_digit(code) == Some(digit))
                .map(|(_, amount)| *amount)
                .sum::<f64>()
                + amounts.get(&root).copied().unwrap_or(0.0)
        };

        let income = category_total(4);
        let cost_of_sales = category_total(5);
        let operating_expenses = category_total(6);
        let other_results = category_total(7);

        let taxes: f64 = leaves
            .iter()
            .filter(|leaf| {
                catalog
                    .get(leaf.account_code.trim())
                    .is_some_and(|account| self.is_tax_account(account))
            })
            .map(|leaf| leaf.amount)
            .sum();

        let gross_profit = income - cost_of_sales;
        let operating_profit = gross_profit - operating_expenses;
        let pretax_profit = operating_profit + other_results;
        let net_profit = pretax_profit - taxes;

        IncomeMetrics {
            income,
            cost_of_sales,
            operating_expenses,
            other_results,
            taxes,
            gross_profit,
            operating_profit,
            pretax_profit,
            net_profit,
            net_profit_materialized: !self.has_net_income_account(catalog),
        }
    }

    fn is_tax_account(&self, account: &Account) -> bool {
        match (account.role, self.tax_detection) {
            (Some(role), _) => role == AccountRole::TaxExpense,
            (None, TaxDetection::RoleOnly) => false,
            (None, TaxDetection::RoleOrName) => {
                let name = account.name.to_lowercase();
                name.contains("tax") || name.contains("impuesto")
            }
        }
    }

    fn has_net_income_account(&self, catalog: &ChartOfAccounts) -> bool {
        catalog.accounts().any(|account| match (account.role, self.net_income_detection) {
            (Some(AccountRole::NetIncomeOverride), _) => true,
            (Some(_), _) | (None, NetIncomeDetection::RoleOnly) => false,
            (None, NetIncomeDetection::RoleOrName) => {
                let name = account.name.to_lowercase();
                (name.contains("profit") || name.contains("utilidad"))
                    && (name.contains("period") || name.contains("ejercicio"))
            }
        })
    }

    /// Aggregates a submitted statement, materializes missing computed accounts and
    /// replaces the statement's lines in one step.
    pub fn submit_statement<C, L>(
        &self,
        catalog_port: &C,
        ledger: &L,
        key: StatementKey,
        leaves: &[StatementLine],
    ) -> Result<AggregationOutcome>
    where
        C: CatalogWriter + ?Sized,
        L: StatementLedger + ?Sized,
    {
        let scope = format!("period {}, {:?}", key.period_id, key.kind);
        let wrap = |stage: &'static str| {
            let scope = scope.clone();
            move |e: DerivationError| {
                e.in_operation("Statement submission", key.company_id, scope, stage)
            }
        };

        info!(
            "Submitting {:?} statement for company {} in period {} ({} leaves)",
            key.kind,
            key.company_id,
            key.period_id,
            leaves.len()
        );

        if leaves.is_empty() {
            return Err(wrap("validation")(DerivationError::validation(
                "statement leaves",
                "at least one line is required",
            )));
        }

        let catalog = catalog_port.load_catalog(key.company_id).map_err(wrap("catalog load"))?;
        for leaf in leaves {
            if !catalog.contains(leaf.account_code.trim()) {
                return Err(wrap("validation")(DerivationError::validation(
                    "statement leaves",
                    format!("account '{}' is not in the chart of accounts", leaf.account_code),
                )));
            }
        }

        let outcome = self.aggregate(leaves, &catalog).map_err(wrap("aggregation"))?;

        let mut created: Vec<&str> = Vec::with_capacity(outcome.materialize.len());
        for account in &outcome.materialize {
            debug!("Materializing computed account {} ({})", account.code, account.name);
            if let Err(e) = catalog_port.upsert_account(key.company_id, account.clone()) {
                self.roll_back_accounts(catalog_port, key.company_id, &created);
                return Err(wrap("account materialization")(e));
            }
            created.push(&account.code);
        }

        if let Err(e) = ledger.replace_lines(key, outcome.lines()) {
            self.roll_back_accounts(catalog_port, key.company_id, &created);
            return Err(wrap("line replacement")(e));
        }

        if outcome.materialize.is_empty() {
            info!("Stored {} lines", outcome.entries.len());
        } else {
            warn!(
                "Stored {} lines; {} computed accounts were missing and were created",
                outcome.entries.len(),
                outcome.materialize.len()
            );
        }

        Ok(outcome)
    }

    // Materialized accounts are new by construction, so removing them restores the catalog.
    fn roll_back_accounts<C>(&self, catalog_port: &C, company_id: u64, created: &[&str])
    where
        C: CatalogWriter + ?Sized,
    {
        for code in created.iter().rev() {
            if let Err(e) = catalog_port.remove_account(company_id, code) {
                warn!(
                    "Could not roll back computed account {} for company {}: {}",
                    code, company_id, e
                );
            }
        }
    }
}
