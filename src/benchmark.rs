use crate::error::Result;
use crate::ports::{RatioValueSource, SectorDirectory};
use crate::schema::{Direction, RatioValue};
use crate::utils::is_negligible;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const EQUALITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Standing {
    Above,
    Below,
    Equal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BenchmarkComparison {
    pub standing: Standing,
    pub meets_benchmark: bool,
}

pub fn compare_to_benchmark(
    value: f64,
    reference: f64,
    direction: Direction,
) -> BenchmarkComparison {
    let standing = if is_negligible(value - reference, EQUALITY_EPSILON) {
        Standing::Equal
    } else if value > reference {
        Standing::Above
    } else {
        Standing::Below
    };

    let meets_benchmark = match direction {
        Direction::HigherIsBetter => standing != Standing::Below,
        Direction::LowerIsBetter => standing != Standing::Above,
        Direction::CloserToOne => (value - 1.0).abs() <= (reference - 1.0).abs() + EQUALITY_EPSILON,
    };

    BenchmarkComparison {
        standing,
        meets_benchmark,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompanyStanding {
    pub company_id: u64,
    /// `None` when the company has no stored value for the ratio and period.
    pub value: Option<f64>,
    pub comparison: Option<BenchmarkComparison>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorBenchmark {
    pub ratio_id: u64,
    pub period_id: u64,
    pub direction: Direction,
    /// Mean over the companies that have a value; `None` when none do.
    pub average: Option<f64>,
    pub companies: Vec<CompanyStanding>,
}

/// Averages the stored values of the sector's companies and places each company against it.
pub fn sector_benchmark(
    values: &[RatioValue],
    companies: &[u64],
    ratio_id: u64,
    period_id: u64,
    direction: Direction,
) -> SectorBenchmark {
    let by_company: BTreeMap<u64, f64> = values
        .iter()
        .filter(|v| v.ratio_id == ratio_id && v.period_id == period_id && v.value.is_finite())
        .map(|v| (v.company_id, v.value))
        .collect();

    let present: Vec<f64> = companies.iter().filter_map(|c| by_company.get(c).copied()).collect();
    let average = if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    };
    debug!(
        "Ratio {} in period {}: {} of {} companies have values",
        ratio_id,
        period_id,
        present.len(),
        companies.len()
    );

    let companies = companies
        .iter()
        .map(|company_id| {
            let value = by_company.get(company_id).copied();
            CompanyStanding {
                company_id: *company_id,
                value,
                comparison: value
                    .zip(average)
                    .map(|(value, average)| compare_to_benchmark(value, average, direction)),
            }
        })
        .collect();

    SectorBenchmark {
        ratio_id,
        period_id,
        direction,
        average,
        companies,
    }
}

pub fn benchmark_sector<D, V>(
    directory: &D,
    source: &V,
    sector_id: u64,
    ratio_id: u64,
    period_id: u64,
    direction: Direction,
) -> Result<SectorBenchmark>
where
    D: SectorDirectory + ?Sized,
    V: RatioValueSource + ?Sized,
{
    let companies = directory.companies_in_sector(sector_id)?;
    info!(
        "Benchmarking ratio {} for sector {} ({} companies) in period {}",
        ratio_id,
        sector_id,
        companies.len(),
        period_id
    );
    let values = source.ratio_values(ratio_id, period_id)?;
    Ok(sector_benchmark(&values, &companies, ratio_id, period_id, direction))
}
