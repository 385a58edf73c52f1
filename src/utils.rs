use crate::error::{DerivationError, Result};
use chrono::{Datelike, Months, NaiveDate};

pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        DerivationError::validation(
            "month",
            format!("{:04}-{:02} is not a valid month", year, month),
        )
    })
}

pub fn validate_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(DerivationError::validation(
            "month",
            format!("invalid month {}: must be between 1 and 12", month),
        ));
    }
    Ok(())
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// January through December of `year` as (year, month) pairs.
pub fn months_of_year(year: i32) -> Vec<(i32, u32)> {
    (1..=12).map(|month| (year, month)).collect()
}

/// Returns the (year, month) reached by moving `offset` months forward from January of `year`.
pub fn month_offset_from_january(year: i32, offset: u32) -> Result<(i32, u32)> {
    let date = first_day_of_month(year, 1)?
        .checked_add_months(Months::new(offset))
        .ok_or_else(|| {
            DerivationError::validation(
                "month",
                format!("{} months after {}-01 overflows", offset, year),
            )
        })?;
    Ok((date.year(), date.month()))
}

pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn is_negligible(value: f64, epsilon: f64) -> bool {
    value.abs() < epsilon
}

/// Parses a month string in the format "YYYY-MM".
/// Returns the first day of that month.
pub fn parse_month_string(month: &str) -> Result<NaiveDate> {
    let start_str = format!("{}-01", month.trim());
    NaiveDate::parse_from_str(&start_str, "%Y-%m-%d").map_err(|_| {
        DerivationError::validation(
            "month",
            format!("Invalid month format: {}. Expected YYYY-MM", month),
        )
    })
}
