use chrono::NaiveDate;
use financial_derivation_engine::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

const COMPANY: u64 = 1;

fn period(id: u64, year: i32) -> Period {
    Period {
        id,
        year,
        start_date: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
    }
}

fn lines(pairs: &[(&str, f64)]) -> Vec<StatementLine> {
    pairs.iter().map(|(code, amount)| StatementLine::new(*code, *amount)).collect()
}

fn retail_catalog() -> Vec<Account> {
    vec![
        Account::new("1.1.01", "Cash", AccountType::Asset, StatementType::BalanceSheet),
        Account::new("1.1.02", "Inventory", AccountType::Asset, StatementType::BalanceSheet),
        Account::new("1.2.01", "Equipment", AccountType::Asset, StatementType::BalanceSheet),
        Account::new("2.1.01", "Suppliers", AccountType::Liability, StatementType::BalanceSheet),
        Account::new("3.1.01", "Share capital", AccountType::Equity, StatementType::BalanceSheet),
        Account::new("4.1", "Sales", AccountType::Income, StatementType::IncomeStatement),
        Account::new("5.1", "Cost of sales", AccountType::Expense, StatementType::IncomeStatement),
        Account::new("6.1", "Salaries", AccountType::Expense, StatementType::IncomeStatement),
        Account::new("6.2", "Rent", AccountType::Expense, StatementType::IncomeStatement),
        Account::new("6.9", "Income tax", AccountType::Expense, StatementType::IncomeStatement)
            .with_role(AccountRole::TaxExpense),
    ]
}

fn balance_key(period_id: u64) -> StatementKey {
    StatementKey {
        company_id: COMPANY,
        period_id,
        kind: StatementKind::Balance,
    }
}

fn income_key(period_id: u64) -> StatementKey {
    StatementKey {
        company_id: COMPANY,
        period_id,
        kind: StatementKind::IncomeStatement,
    }
}

fn component(concept_id: u64, role: ComponentRole, order: i32) -> RatioComponent {
    RatioComponent {
        concept_id,
        role,
        order,
        operation: Operation::Add,
        factor: None,
        requires_averaging: false,
    }
}

fn ratio(id: u64, code: &str, components: Vec<RatioComponent>) -> RatioDefinition {
    RatioDefinition {
        id,
        code: code.to_string(),
        name: code.to_string(),
        category: "TEST".to_string(),
        formula: String::new(),
        numerator_multiplier: None,
        denominator_multiplier: None,
        result_multiplier: None,
        active: true,
        protected: false,
        direction: Direction::HigherIsBetter,
        components,
    }
}

#[test]
fn test_statement_submission_materializes_hierarchy() -> anyhow::Result<()> {
    let store = InMemoryStore::new();
    store.load_accounts(COMPANY, retail_catalog())?;
    let engine = DerivationEngine::new(EngineConfig::default())?;

    let outcome = engine.submit_statement(
        &store,
        &store,
        balance_key(1),
        &lines(&[
            ("1.1.01", 1_000.0),
            ("1.1.02", 4_000.0),
            ("1.2.01", 10_000.0),
            ("2.1.01", 3_000.0),
            ("3.1.01", 12_000.0),
        ]),
    )?;

    assert_eq!(outcome.amount_of("1.1"), Some(5_000.0));
    assert_eq!(outcome.amount_of("1"), Some(15_000.0));
    assert_eq!(outcome.amount_of("2"), Some(3_000.0));
    assert_eq!(outcome.amount_of("3"), Some(12_000.0));
    assert!(outcome.metrics.is_none());

    let stored = store.read_lines(&balance_key(1))?.expect("statement stored");
    assert_eq!(stored.len(), outcome.entries.len());
    assert_eq!(stored[0].account_code, "1.1.01");

    let materialized = store.find_account(COMPANY, "1.2")?.expect("parent materialized");
    assert!(materialized.is_computed);
    assert_eq!(materialized.name, "NON-CURRENT ASSETS");
    assert_eq!(materialized.account_type, AccountType::Asset);

    // A second submission replaces the lines and reuses the materialized accounts.
    let catalog_size = store.load_catalog(COMPANY)?.len();
    let resubmitted =
        engine.submit_statement(&store, &store, balance_key(1), &lines(&[("1.1.01", 500.0)]))?;
    assert!(resubmitted.materialize.is_empty());
    assert_eq!(store.load_catalog(COMPANY)?.len(), catalog_size);
    let statement = store.read_statement(balance_key(1))?.expect("statement stored");
    assert_eq!(statement.key, balance_key(1));
    assert_eq!(statement.lines.len(), 3);
    assert!(statement.lines.iter().all(|l| l.account_code != "1.2"));

    Ok(())
}

#[test]
fn test_income_statement_with_tax_role() -> anyhow::Result<()> {
    let store = InMemoryStore::new();
    store.load_accounts(COMPANY, retail_catalog())?;
    let engine = DerivationEngine::new(EngineConfig::default())?;

    let outcome = engine.submit_statement(
        &store,
        &store,
        income_key(1),
        &lines(&[
            ("4.1", 50_000.0),
            ("5.1", 20_000.0),
            ("6.1", 12_000.0),
            ("6.2", 3_000.0),
            ("6.9", 4_500.0),
        ]),
    )?;

    let metrics = outcome.metrics.clone().expect("income statement metrics");
    assert_eq!(metrics.gross_profit, 30_000.0);
    // The tax account is still an operating expense leaf under "6".
    assert_eq!(metrics.operating_profit, 10_500.0);
    assert_eq!(metrics.pretax_profit, 10_500.0);
    assert_eq!(metrics.taxes, 4_500.0);
    assert_eq!(metrics.net_profit, 6_000.0);

    let stored = store.read_lines(&income_key(1))?.expect("statement stored");
    let net = stored.iter().find(|l| l.account_code == NET_PROFIT_CODE).expect("net profit line");
    assert_eq!(net.amount, 6_000.0);
    assert!(!net.use_in_ratios);
    assert!(store.find_account(COMPANY, GROSS_PROFIT_CODE)?.expect("derived").is_computed);

    Ok(())
}

#[test]
fn test_aggregation_is_associative_for_random_trees() {
    let mut rng = StdRng::seed_from_u64(7);
    let aggregator = AccountAggregator::new(&EngineConfig::default());

    for _ in 0..50 {
        let mut codes = BTreeSet::new();
        for _ in 0..rng.gen_range(1..=25) {
            let depth = rng.gen_range(1..=4);
            let mut code = rng.gen_range(1..=7).to_string();
            for _ in 1..depth {
                code.push_str(&format!(".{}", rng.gen_range(1..=3)));
            }
            codes.insert(code);
        }
        // Leaves never sit above other leaves.
        let leaf_codes: Vec<String> = codes
            .iter()
            .filter(|code| !codes.iter().any(|other| other.starts_with(&format!("{}.", code))))
            .cloned()
            .collect();
        let leaves: Vec<StatementLine> = leaf_codes
            .iter()
            .map(|code| StatementLine::new(code.clone(), rng.gen_range(-50_000..=50_000) as f64))
            .collect();

        let outcome = aggregator
            .aggregate(&leaves, &ChartOfAccounts::new(COMPANY))
            .expect("well-formed leaves aggregate");

        let hierarchy: Vec<&AggregatedEntry> = outcome
            .entries
            .iter()
            .filter(|e| e.origin != EntryOrigin::Derived)
            .collect();
        for parent in hierarchy.iter().filter(|e| e.origin == EntryOrigin::Ancestor) {
            let prefix = format!("{}.", parent.account.code);
            let children: f64 = hierarchy
                .iter()
                .filter(|e| {
                    e.account
                        .code
                        .strip_prefix(&prefix)
                        .is_some_and(|rest| !rest.contains('.'))
                })
                .map(|e| e.amount)
                .sum();
            assert!(
                (parent.amount - children).abs() < 1e-6,
                "{} = {} but children sum to {}",
                parent.account.code,
                parent.amount,
                children
            );

            let descendants: f64 = leaves
                .iter()
                .filter(|l| l.account_code.starts_with(&prefix))
                .map(|l| l.amount)
                .sum();
            assert!((parent.amount - descendants).abs() < 1e-6);
        }
    }
}

#[test]
fn test_ratios_from_submitted_statements() -> anyhow::Result<()> {
    let store = InMemoryStore::new();
    store.load_accounts(COMPANY, retail_catalog())?;
    store.add_period(period(1, 2023))?;
    store.add_period(period(2, 2024))?;
    let engine = DerivationEngine::new(EngineConfig::default())?;

    engine.submit_statement(
        &store,
        &store,
        balance_key(1),
        &lines(&[("1.1.01", 1_000.0), ("1.1.02", 1_000.0), ("2.1.01", 1_000.0)]),
    )?;
    engine.submit_statement(
        &store,
        &store,
        balance_key(2),
        &lines(&[("1.1.01", 3_000.0), ("1.1.02", 3_000.0), ("2.1.01", 2_000.0)]),
    )?;

    // 10 = current assets, 20 = current liabilities, 30 = inventory
    store.map_concept(COMPANY, 10, "1.1")?;
    store.map_concept(COMPANY, 20, "2.1")?;
    store.map_concept(COMPANY, 30, "1.1.02")?;

    let current = ratio(
        1,
        "CURRENT_RATIO",
        vec![
            component(10, ComponentRole::Numerator, 1),
            component(20, ComponentRole::Denominator, 1),
        ],
    );
    let mut averaged_inventory = ratio(
        2,
        "AVG_INVENTORY_COVER",
        vec![
            component(30, ComponentRole::Numerator, 1),
            component(20, ComponentRole::Denominator, 1),
        ],
    );
    averaged_inventory.components[0].requires_averaging = true;
    let unmapped = ratio(
        3,
        "UNMAPPED",
        vec![
            component(10, ComponentRole::Numerator, 1),
            component(99, ComponentRole::Denominator, 1),
        ],
    );

    let selector = PeriodSelector::parse("2024")?;
    let evaluation = engine.evaluate_ratio(&store, &store, &current, COMPANY, selector)?;
    assert_eq!(evaluation.value, 3.0);
    assert_eq!(evaluation.period_id, 2);

    let report = engine.compute_ratios(
        &store,
        &store,
        &store,
        &[current, averaged_inventory, unmapped],
        COMPANY,
        PeriodSelector::from_raw(2),
    )?;

    assert_eq!(report.computed.len(), 2);
    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].code, "UNMAPPED");
    assert!(report.failures[0].reason.contains("UNMAPPED"));

    // (3000 + 1000) / 2 / 2000
    let stored = store.ratio_value(COMPANY, 2, 2)?.expect("averaged ratio stored");
    assert!((stored.value - 1.0).abs() < 1e-9);
    assert_eq!(stored.source, ValueSource::Computed);
    assert!(store.ratio_value(COMPANY, 2, 3)?.is_none());

    Ok(())
}

#[test]
fn test_legacy_denominator_policy_from_json() -> anyhow::Result<()> {
    let store = InMemoryStore::new();
    store.load_accounts(COMPANY, retail_catalog())?;
    store.add_period(period(1, 2024))?;
    store.map_concept(COMPANY, 10, "1.1")?;

    let engine = DerivationEngine::from_json(r#"{ "denominator_policy": "default_to_one" }"#)?;
    engine.submit_statement(&store, &store, balance_key(1), &lines(&[("1.1.01", 750.0)]))?;

    let working_capital =
        ratio(1, "NUMERATOR_ONLY", vec![component(10, ComponentRole::Numerator, 1)]);
    let selector = PeriodSelector::Year(2024);
    let evaluation = engine.evaluate_ratio(&store, &store, &working_capital, COMPANY, selector)?;
    assert_eq!(evaluation.value, 750.0);
    assert!(evaluation.denominator_defaulted);

    let strict = DerivationEngine::new(EngineConfig::default())?;
    let err = strict
        .evaluate_ratio(&store, &store, &working_capital, COMPANY, PeriodSelector::Year(2024))
        .unwrap_err();
    assert!(err.is_division_by_zero());

    Ok(())
}

#[test]
fn test_projection_regeneration_is_idempotent() -> anyhow::Result<()> {
    let store = InMemoryStore::new();
    for month in 1..=12 {
        store.record_sales(MonthlySales {
            company_id: COMPANY,
            year: 2023,
            month,
            amount: 100.0 + 10.0 * month as f64,
        })?;
    }
    let engine = DerivationEngine::new(EngineConfig::default())?;

    let method = ProjectionMethod::LeastSquares;
    let first = engine.project_sales(&store, &store, COMPANY, method, 2024, Some(42))?;
    let second = engine.project_sales(&store, &store, COMPANY, method, 2024, Some(77))?;

    assert_eq!(first.details, second.details);
    assert_eq!(first.id, second.id);
    assert_eq!(second.created_by, Some(42));
    assert_eq!(second.revision, 2);
    assert_eq!(second.details.len(), 12);
    assert!((second.details[0].projected_amount - 230.0).abs() < 0.01);
    assert!((second.details[11].projected_amount - 340.0).abs() < 0.01);

    let absolute = ProjectionMethod::AbsoluteGrowth;
    let other = engine.project_sales(&store, &store, COMPANY, absolute, 2024, None)?;
    assert_ne!(other.id, first.id);
    assert!((other.details[0].projected_amount - 230.0).abs() < 0.01);

    let headers = store.projections()?;
    assert_eq!(headers.len(), 2);

    Ok(())
}

#[test]
fn test_projection_without_history_is_flat_zero() -> anyhow::Result<()> {
    let store = InMemoryStore::new();
    let engine = DerivationEngine::new(EngineConfig::default())?;
    let method: ProjectionMethod = "incremento_porcentual".parse()?;
    let projection = engine.project_sales(&store, &store, COMPANY, method, 2025, None)?;

    assert_eq!(projection.method, ProjectionMethod::PercentageGrowth);
    assert!(projection.details.iter().all(|d| d.projected_amount == 0.0));
    assert_eq!(projection.details[11].month, 12);
    Ok(())
}

#[test]
fn test_vertical_analysis_and_sector_benchmark() -> anyhow::Result<()> {
    let store = InMemoryStore::new();
    let engine = DerivationEngine::new(EngineConfig::default())?;
    store.add_period(period(5, 2024))?;

    let fixed_width = vec![
        Account::new("1000", "ACTIVO", AccountType::Asset, StatementType::BalanceSheet),
        Account::new("1110", "Caja", AccountType::Asset, StatementType::BalanceSheet),
        Account::new("1120", "Bancos", AccountType::Asset, StatementType::BalanceSheet),
        Account::new("2000", "PASIVO", AccountType::Liability, StatementType::BalanceSheet),
        Account::new("2110", "Proveedores", AccountType::Liability, StatementType::BalanceSheet),
    ];

    let balances = [
        (1, 200.0, 800.0, 500.0),
        (2, 100.0, 100.0, 400.0),
        (3, 0.0, 0.0, 0.0),
    ];
    for (company, cash, banks, suppliers) in balances {
        store.load_accounts(company, fixed_width.clone())?;
        store.assign_sector(company, 9)?;
        store.map_concept(company, 10, "1000")?;
        store.map_concept(company, 20, "2000")?;
        if company == 3 {
            continue;
        }
        let key = StatementKey {
            company_id: company,
            period_id: 5,
            kind: StatementKind::Balance,
        };
        engine.submit_statement(
            &store,
            &store,
            key,
            &lines(&[
                ("1000", cash + banks),
                ("1110", cash),
                ("1120", banks),
                ("2000", suppliers),
                ("2110", suppliers),
            ]),
        )?;
    }

    let analyzer = BalanceAnalyzer::new(&store, &store);
    let vertical = analyzer.vertical(1, 5, Some(Section::Assets), LevelFilter::Detalle)?;
    let shares: Vec<(String, Option<f64>)> = vertical
        .lines
        .iter()
        .map(|l| (l.code.clone(), l.percentage))
        .collect();
    assert_eq!(shares, vec![("1110".to_string(), Some(0.2)), ("1120".to_string(), Some(0.8))]);

    let current = ratio(
        1,
        "CURRENT_RATIO",
        vec![
            component(10, ComponentRole::Numerator, 1),
            component(20, ComponentRole::Denominator, 1),
        ],
    );
    for company in [1, 2, 3] {
        engine.compute_ratios(
            &store,
            &store,
            &store,
            &[current.clone()],
            company,
            PeriodSelector::Id(5),
        )?;
    }

    let benchmark = benchmark_sector(&store, &store, 9, 1, 5, current.direction)?;
    // company 1: 1000 / 500 = 2.0, company 2: 200 / 400 = 0.5, company 3 has no statement
    assert_eq!(benchmark.average, Some(1.25));
    assert!(benchmark.companies[0].comparison.expect("has value").meets_benchmark);
    assert!(!benchmark.companies[1].comparison.expect("has value").meets_benchmark);
    assert_eq!(benchmark.companies[2].value, None);

    Ok(())
}
