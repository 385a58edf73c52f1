//! # Financial Derivation Engine
//!
//! Derives secondary financial figures from the balances a company enters.
//!
//! ## Core Concepts
//!
//! - **Aggregation**: leaf balances roll up a dotted account hierarchy (`1.1.01` -> `1.1` -> `1`),
//!   and income statements gain gross, operating, pretax and net profit sub-totals
//! - **Ratios**: formulas over company-agnostic concepts, folded into numerator, denominator
//!   and operand pools, with optional prior-year averaging
//! - **Projections**: twelve months of sales from monthly history by least squares,
//!   percentage growth or absolute growth
//! - **Analysis**: vertical and horizontal balance sheet analysis and sector benchmarks
//!
//! Storage is reached through the traits in [`ports`]; [`InMemoryStore`] implements all of them.
//!
//! ## Example
//!
//! ```rust
//! use financial_derivation_engine::*;
//!
//! let store = InMemoryStore::new();
//! store
//!     .load_accounts(
//!         1,
//!         vec![
//!             Account::new("4.1", "Sales", AccountType::Income, StatementType::IncomeStatement),
//!             Account::new("5.1", "Costs", AccountType::Expense, StatementType::IncomeStatement),
//!         ],
//!     )
//!     .unwrap();
//!
//! let engine = DerivationEngine::new(EngineConfig::default()).unwrap();
//! let key = StatementKey { company_id: 1, period_id: 1, kind: StatementKind::IncomeStatement };
//! let outcome = engine
//!     .submit_statement(
//!         &store,
//!         &store,
//!         key,
//!         &[StatementLine::new("4.1", 1000.0), StatementLine::new("5.1", 400.0)],
//!     )
//!     .unwrap();
//!
//! assert_eq!(outcome.amount_of("8.1"), Some(600.0));
//! ```

pub mod aggregator;
pub mod analysis;
pub mod benchmark;
pub mod chart_of_accounts;
pub mod config;
pub mod error;
pub mod memory;
pub mod ports;
pub mod projection;
pub mod ratio;
pub mod schema;
pub mod utils;

pub use aggregator::{
    AccountAggregator, AggregatedEntry, AggregationOutcome, EntryOrigin, IncomeMetrics,
    GROSS_PROFIT_CODE, NET_PROFIT_CODE, OPERATING_PROFIT_CODE, PRETAX_PROFIT_CODE,
};
pub use analysis::{
    horizontal_analysis, vertical_analysis, BalanceAnalyzer, HorizontalLine, LevelFilter, Section,
    SectionTotals, VerticalAnalysis, VerticalLine,
};
pub use benchmark::{
    benchmark_sector, compare_to_benchmark, sector_benchmark, BenchmarkComparison, CompanyStanding,
    SectorBenchmark, Standing,
};
pub use chart_of_accounts::{ChartOfAccounts, CodeLevel};
pub use config::{DenominatorPolicy, EngineConfig, HistoryWindow, NetIncomeDetection, TaxDetection};
pub use error::{DerivationError, Result};
pub use memory::InMemoryStore;
pub use ports::*;
pub use projection::{prepare_history, GrowthMultipliers, HistoricalMonth, ProjectionEngine};
pub use ratio::{BulkRatioReport, ComponentBreakdown, RatioEvaluation, RatioEvaluator, RatioFailure};
pub use schema::*;

use log::info;

/// Entry point bundling a validated configuration with every engine.
pub struct DerivationEngine {
    config: EngineConfig,
}

impl DerivationEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Derivation engine ready (denominator policy {:?}, tax detection {:?})",
            config.denominator_policy, config.tax_detection
        );
        Ok(Self { config })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(EngineConfig::from_json(json)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn aggregator(&self) -> AccountAggregator {
        AccountAggregator::new(&self.config)
    }

    pub fn aggregate(
        &self,
        leaves: &[StatementLine],
        catalog: &ChartOfAccounts,
    ) -> Result<AggregationOutcome> {
        self.aggregator().aggregate(leaves, catalog)
    }

    pub fn submit_statement<C, L>(
        &self,
        catalog: &C,
        ledger: &L,
        key: StatementKey,
        leaves: &[StatementLine],
    ) -> Result<AggregationOutcome>
    where
        C: CatalogWriter + ?Sized,
        L: StatementLedger + ?Sized,
    {
        self.aggregator().submit_statement(catalog, ledger, key, leaves)
    }

    pub fn ratio_evaluator<'a, R, P>(
        &self,
        resolver: &'a R,
        periods: &'a P,
    ) -> RatioEvaluator<'a, R, P>
    where
        R: ConceptAmountResolver + ?Sized,
        P: PeriodRepository + ?Sized,
    {
        RatioEvaluator::new(resolver, periods, &self.config)
    }

    pub fn evaluate_ratio<R, P>(
        &self,
        resolver: &R,
        periods: &P,
        ratio: &RatioDefinition,
        company_id: u64,
        selector: PeriodSelector,
    ) -> Result<RatioEvaluation>
    where
        R: ConceptAmountResolver + ?Sized,
        P: PeriodRepository + ?Sized,
    {
        self.ratio_evaluator(resolver, periods)
            .evaluate_for(ratio, company_id, selector)
    }

    pub fn compute_ratios<R, P, S>(
        &self,
        resolver: &R,
        periods: &P,
        sink: &S,
        ratios: &[RatioDefinition],
        company_id: u64,
        selector: PeriodSelector,
    ) -> Result<BulkRatioReport>
    where
        R: ConceptAmountResolver + ?Sized,
        P: PeriodRepository + ?Sized,
        S: RatioValueSink + ?Sized,
    {
        self.ratio_evaluator(resolver, periods)
            .compute_all(ratios, company_id, selector, sink)
    }

    pub fn projection_engine(&self) -> ProjectionEngine {
        ProjectionEngine::new(&self.config)
    }

    pub fn project_sales<R, S>(
        &self,
        reader: &R,
        store: &S,
        company_id: u64,
        method: ProjectionMethod,
        target_year: i32,
        requested_by: Option<u64>,
    ) -> Result<Projection>
    where
        R: SalesHistoryReader + ?Sized,
        S: ProjectionStore + ?Sized,
    {
        self.projection_engine()
            .generate_and_store(reader, store, company_id, method, target_year, requested_by)
    }
}
