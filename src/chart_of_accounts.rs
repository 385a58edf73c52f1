//! Company chart of accounts and the two account coding conventions.
//!
//! Aggregation walks the dot-segmented hierarchy: the parent of `1.1.01` is `1.1`,
//! whose parent is `1`. Read-only analysis additionally understands the fixed-width
//! numeric scheme (`1000`, `1100`, `1110`) through [`CodeLevel`]. The two are never
//! mixed: a 4-digit code has no dotted parent.

use crate::error::{DerivationError, Result};
use crate::schema::{Account, AccountType, StatementType};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChartOfAccounts {
    pub company_id: u64,
    accounts: BTreeMap<String, Account>,
}

impl ChartOfAccounts {
    pub fn new(company_id: u64) -> Self {
        Self {
            company_id,
            accounts: BTreeMap::new(),
        }
    }

    /// Builds a catalog, rejecting blank or duplicated codes.
    pub fn from_accounts(company_id: u64, accounts: Vec<Account>) -> Result<Self> {
        let mut chart = Self::new(company_id);
        for account in accounts {
            let code = account.code.trim();
            if code.is_empty() {
                return Err(DerivationError::validation(
                    format!("chart of accounts of company {}", company_id),
                    format!("account '{}' has an empty code", account.name),
                ));
            }
            if chart.accounts.contains_key(code) {
                return Err(DerivationError::validation(
                    format!("chart of accounts of company {}", company_id),
                    format!("duplicate account code '{}'", code),
                ));
            }
            chart.insert(account);
        }
        Ok(chart)
    }

    pub fn get(&self, code: &str) -> Option<&Account> {
        self.accounts.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.accounts.contains_key(code)
    }

    /// Inserts or replaces the account with the same code.
    pub fn insert(&mut self, mut account: Account) {
        account.code = account.code.trim().to_string();
        self.accounts.insert(account.code.clone(), account);
    }

    pub fn remove(&mut self, code: &str) -> Option<Account> {
        self.accounts.remove(code)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

pub fn parent_code(code: &str) -> Option<&str> {
    code.rfind('.').map(|idx| &code[..idx])
}

/// All proper ancestors of a dotted code, nearest first: "1.1.01" -> ["1.1", "1"].
pub fn ancestor_codes(code: &str) -> Vec<String> {
    let mut ancestors = Vec::new();
    let mut current = code;
    while let Some(parent) = parent_code(current) {
        if parent.is_empty() {
            break;
        }
        ancestors.push(parent.to_string());
        current = parent;
    }
    ancestors
}

pub fn depth(code: &str) -> usize {
    code.matches('.').count()
}

/// "1.1.01" is a direct child of "1.1" but not of "1".
pub fn is_direct_child(child: &str, parent: &str) -> bool {
    match child.strip_prefix(parent).and_then(|rest| rest.strip_prefix('.')) {
        Some(rest) => !rest.is_empty() && !rest.contains('.'),
        None => false,
    }
}

pub fn leading_digit(code: &str) -> Option<u32> {
    code.chars().next().and_then(|c| c.to_digit(10))
}

/// Account type and statement inferred from the leading digit of a code.
pub fn infer_category(code: &str) -> (AccountType, StatementType) {
    match leading_digit(code) {
        Some(1) => (AccountType::Asset, StatementType::BalanceSheet),
        Some(2) => (AccountType::Liability, StatementType::BalanceSheet),
        Some(3) => (AccountType::Equity, StatementType::BalanceSheet),
        Some(4) | Some(7) => (AccountType::Income, StatementType::IncomeStatement),
        Some(5) | Some(6) => (AccountType::Expense, StatementType::IncomeStatement),
        Some(8) => (AccountType::Income, StatementType::IncomeStatement),
        _ => (AccountType::Asset, StatementType::None),
    }
}

pub fn default_account_name(code: &str) -> String {
    let name = match code {
        "1" => "ASSETS",
        "1.1" => "CURRENT ASSETS",
        "1.2" => "NON-CURRENT ASSETS",
        "2" => "LIABILITIES",
        "2.1" => "CURRENT LIABILITIES",
        "2.2" => "NON-CURRENT LIABILITIES",
        "3" => "EQUITY",
        "4" => "INCOME",
        "5" => "COST OF SALES",
        "6" => "OPERATING EXPENSES",
        "7" => "OTHER RESULTS",
        _ => return format!("Aggregated account {}", code),
    };
    name.to_string()
}

/// A computed account for a code the catalog does not have yet.
pub fn inferred_account(code: &str) -> Account {
    let (account_type, statement_type) = infer_category(code);
    Account::new(code, default_account_name(code), account_type, statement_type).computed()
}

/// Level of a code in the fixed-width numeric scheme used by read-only analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeLevel {
    /// `#000` or a single digit.
    Mayor,
    /// `##00` or `#.#`.
    SubMayor,
    /// `###0`, any other 4-digit code, or a deeper dotted code.
    Detalle,
    /// Anything that fits neither scheme.
    Movimiento,
}

impl CodeLevel {
    pub fn classify(code: &str) -> Self {
        let code = code.trim();
        if code.is_empty() {
            return Self::Movimiento;
        }

        if code.contains('.') {
            let segments: Vec<&str> = code.split('.').collect();
            let all_digits = segments
                .iter()
                .all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()));
            if !all_digits || segments[0].len() != 1 {
                return Self::Movimiento;
            }
            if segments.len() == 2 && segments[1].len() == 1 {
                return Self::SubMayor;
            }
            return Self::Detalle;
        }

        if !code.chars().all(|c| c.is_ascii_digit()) {
            return Self::Movimiento;
        }

        match code.len() {
            1 => Self::Mayor,
            4 if code.ends_with("000") => Self::Mayor,
            4 if code.ends_with("00") => Self::SubMayor,
            4 => Self::Detalle,
            _ => Self::Movimiento,
        }
    }
}
