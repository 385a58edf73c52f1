//! Twelve-month sales projection from monthly history.
//!
//! All three methods share one fallback: no history projects zeros, a single
//! month repeats itself, and only two or more months reach the method itself.

use crate::config::{EngineConfig, HistoryWindow};
use crate::error::{DerivationError, Result};
use crate::ports::{ProjectionStore, SalesHistoryReader};
use crate::schema::{MonthlySales, Projection, ProjectionDetail, ProjectionMethod};
use crate::utils::{
    first_day_of_month, month_offset_from_january, months_between, months_of_year,
    parse_month_string, round_to_cents, validate_month,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PROJECTED_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HistoricalMonth {
    pub year: i32,
    pub month: u32,
    pub amount: f64,
}

/// Collapses raw sales into one chronologically sorted point per month.
///
/// Without window bounds only the calendar year before `target_year` is used.
/// Explicit bounds replace that default; the trailing `months` limit applies last.
/// Months on or after January of `target_year` are never history.
pub fn prepare_history(
    sales: &[MonthlySales],
    target_year: i32,
    window: &HistoryWindow,
) -> Result<Vec<HistoricalMonth>> {
    let target_start = first_day_of_month(target_year, 1)?;
    let start = window.base_start.as_deref().map(parse_month_string).transpose()?;
    let end = window.base_end.as_deref().map(parse_month_string).transpose()?;
    let bounded = start.is_some() || end.is_some();

    let mut totals: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for sale in sales {
        validate_month(sale.month)?;
        *totals.entry((sale.year, sale.month)).or_insert(0.0) += sale.amount;
    }

    let mut history = Vec::with_capacity(totals.len());
    for ((year, month), amount) in totals {
        let date = first_day_of_month(year, month)?;
        if date >= target_start {
            continue;
        }
        let included = if bounded {
            start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
        } else {
            year == target_year - 1
        };
        if included {
            history.push(HistoricalMonth { year, month, amount });
        }
    }

    if let Some(limit) = window.months {
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
    }

    Ok(history)
}

fn detail(year: i32, month: u32, amount: f64) -> ProjectionDetail {
    ProjectionDetail {
        year,
        month,
        projected_amount: round_to_cents(amount.max(0.0)),
    }
}

fn flat_year(target_year: i32, amount: f64) -> Vec<ProjectionDetail> {
    months_of_year(target_year)
        .into_iter()
        .map(|(year, month)| detail(year, month, amount))
        .collect()
}

/// Shared fallback: zeros for no history, the single value for one month,
/// the mean otherwise.
pub fn fallback(history: &[HistoricalMonth], target_year: i32) -> Vec<ProjectionDetail> {
    let amount = match history {
        [] => 0.0,
        [only] => only.amount,
        _ => history.iter().map(|h| h.amount).sum::<f64>() / history.len() as f64,
    };
    flat_year(target_year, amount)
}

fn project_months(
    target_year: i32,
    mut value_at: impl FnMut(u32) -> f64,
) -> Result<Vec<ProjectionDetail>> {
    (0..PROJECTED_MONTHS)
        .map(|k| -> Result<ProjectionDetail> {
            let (year, month) = month_offset_from_january(target_year, k)?;
            Ok(detail(year, month, value_at(k)))
        })
        .collect()
}

/// Fits `amount = a + b*x` over x = 1..N and extrapolates across the target year.
///
/// The first projected x is `N + max(1, gap)`, where gap is the number of months
/// from the last historical month to January of the target year.
pub fn least_squares(
    history: &[HistoricalMonth],
    target_year: i32,
    regression_epsilon: f64,
) -> Result<Vec<ProjectionDetail>> {
    if history.len() < 2 {
        return Ok(fallback(history, target_year));
    }

    let n = history.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xx, mut sum_xy) = (0.0, 0.0, 0.0, 0.0);
    for (i, point) in history.iter().enumerate() {
        let x = (i + 1) as f64;
        sum_x += x;
        sum_y += point.amount;
        sum_xx += x * x;
        sum_xy += x * point.amount;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < regression_epsilon {
        warn!(
            "Degenerate regression over {} months, projecting the historical mean",
            history.len()
        );
        return Ok(fallback(history, target_year));
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let last = &history[history.len() - 1];
    let gap = months_between(
        first_day_of_month(last.year, last.month)?,
        first_day_of_month(target_year, 1)?,
    );
    let x_start = n + gap.max(1) as f64;
    debug!(
        "Least squares: intercept {:.4}, slope {:.4}, first projected x {}",
        intercept, slope, x_start
    );

    project_months(target_year, |k| intercept + slope * (x_start + k as f64))
}

/// Month-over-month growth factors `1 + r`, all strictly positive.
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthMultipliers(Vec<f64>);

impl GrowthMultipliers {
    /// Returns `None` when `rates` is empty or any `1 + r` is not strictly positive.
    pub fn from_rates(rates: &[f64]) -> Option<Self> {
        if rates.is_empty() || rates.iter().any(|r| 1.0 + r <= 0.0) {
            return None;
        }
        Some(Self(rates.iter().map(|r| 1.0 + r).collect()))
    }

    pub fn geometric_mean_rate(&self) -> f64 {
        let product: f64 = self.0.iter().product();
        product.powf(1.0 / self.0.len() as f64) - 1.0
    }
}

/// Geometric mean when every multiplier is positive, arithmetic mean otherwise.
pub fn average_growth_rate(rates: &[f64]) -> f64 {
    match GrowthMultipliers::from_rates(rates) {
        Some(multipliers) => multipliers.geometric_mean_rate(),
        None if rates.is_empty() => 0.0,
        None => {
            debug!("Growth rates include a collapse to zero or below, using the arithmetic mean");
            rates.iter().sum::<f64>() / rates.len() as f64
        }
    }
}

pub fn percentage_growth(
    history: &[HistoricalMonth],
    target_year: i32,
    growth_epsilon: f64,
) -> Result<Vec<ProjectionDetail>> {
    if history.len() < 2 {
        return Ok(fallback(history, target_year));
    }

    let rates: Vec<f64> = history
        .windows(2)
        .map(|pair| (pair[1].amount - pair[0].amount) / pair[0].amount.max(growth_epsilon))
        .collect();
    let rate = average_growth_rate(&rates);
    debug!("Percentage growth: average monthly rate {:.6}", rate);

    let mut running = history[history.len() - 1].amount;
    project_months(target_year, |_| {
        running *= 1.0 + rate;
        running
    })
}

pub fn absolute_growth(
    history: &[HistoricalMonth],
    target_year: i32,
) -> Result<Vec<ProjectionDetail>> {
    if history.len() < 2 {
        return Ok(fallback(history, target_year));
    }

    let diffs: Vec<f64> = history.windows(2).map(|pair| pair[1].amount - pair[0].amount).collect();
    let step = diffs.iter().sum::<f64>() / diffs.len() as f64;
    debug!("Absolute growth: average monthly change {:.4}", step);

    let mut running = history[history.len() - 1].amount;
    project_months(target_year, |_| {
        running += step;
        running
    })
}

pub struct ProjectionEngine {
    growth_epsilon: f64,
    regression_epsilon: f64,
    window: HistoryWindow,
}

impl ProjectionEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            growth_epsilon: config.growth_epsilon,
            regression_epsilon: config.regression_epsilon,
            window: config.history.clone(),
        }
    }

    pub fn project(
        &self,
        method: ProjectionMethod,
        history: &[HistoricalMonth],
        target_year: i32,
    ) -> Result<Vec<ProjectionDetail>> {
        if history.len() < 2 {
            debug!("{} history months, using the fallback projection", history.len());
        }
        match method {
            ProjectionMethod::LeastSquares => {
                least_squares(history, target_year, self.regression_epsilon)
            }
            ProjectionMethod::PercentageGrowth => {
                percentage_growth(history, target_year, self.growth_epsilon)
            }
            ProjectionMethod::AbsoluteGrowth => absolute_growth(history, target_year),
        }
    }

    /// Reads the company's sales history and projects the target year without storing anything.
    pub fn generate<R>(
        &self,
        reader: &R,
        company_id: u64,
        method: ProjectionMethod,
        target_year: i32,
    ) -> Result<Vec<ProjectionDetail>>
    where
        R: SalesHistoryReader + ?Sized,
    {
        let scope = format!("{} for {}", method, target_year);
        let sales = reader
            .monthly_sales(company_id)
            .map_err(|e| e.in_operation("Projection", company_id, scope.clone(), "history read"))?;
        let history = prepare_history(&sales, target_year, &self.window).map_err(|e| {
            e.in_operation("Projection", company_id, scope.clone(), "history preparation")
        })?;

        info!(
            "Projecting {} for company {} with {} history months",
            scope,
            company_id,
            history.len()
        );

        self.project(method, &history, target_year)
            .map_err(|e| e.in_operation("Projection", company_id, scope, "projection"))
    }

    /// Generates the projection and upserts it on (company, method, year).
    ///
    /// A regeneration keeps the header id and the first creator, bumps the
    /// revision and replaces all twelve details.
    pub fn generate_and_store<R, S>(
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
        let details = self.generate(reader, company_id, method, target_year)?;
        if details.len() != PROJECTED_MONTHS as usize {
            return Err(DerivationError::validation(
                "projection",
                format!("expected {} months, produced {}", PROJECTED_MONTHS, details.len()),
            ));
        }

        let scope = format!("{} for {}", method, target_year);
        let existing = store
            .find_projection(company_id, method, target_year)
            .map_err(|e| e.in_operation("Projection", company_id, scope.clone(), "lookup"))?;

        let projection = match existing {
            Some(previous) => {
                debug!("Replacing projection {} (revision {})", previous.id, previous.revision);
                Projection {
                    details,
                    revision: previous.revision + 1,
                    ..previous
                }
            }
            None => Projection {
                id: 0,
                company_id,
                method,
                target_year,
                created_by: requested_by,
                revision: 1,
                details,
            },
        };

        store
            .save_projection(projection)
            .map_err(|e| e.in_operation("Projection", company_id, scope, "store"))
    }
}
