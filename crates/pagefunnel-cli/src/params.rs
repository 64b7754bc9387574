//! Run parameter resolution.
//!
//! Turns raw run parameters plus configuration into an immutable
//! [`RunContext`] that every later step borrows. Nothing here touches the
//! backend, so every failure happens before any read or write.

use crate::config::{is_identifier, Config, Target};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use pagefunnel_backend::{ScopePredicate, TableRef};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur while resolving run parameters
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("Country '{country}' has no company code mapping (known: {known})")]
    UnmappedCountry { country: String, known: String },

    #[error("Company code {given} does not match {resolved}, the code mapped to country '{country}'")]
    CompanyCodeMismatch {
        given: i16,
        resolved: i16,
        country: String,
    },

    #[error("Invalid period '{0}': expected a month number 1-12")]
    InvalidPeriod(String),

    #[error("Invalid year '{0}': expected four digits")]
    InvalidYear(String),

    #[error("Invalid {field} '{value}': expected a plain SQL identifier")]
    InvalidIdentifier { field: &'static str, value: String },
}

/// Raw parameters of one run, as given on the command line.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub country: String,
    pub company_code: i16,
    pub period: String,
    pub year: String,
    /// Defaults to yesterday in the reporting locale
    pub data_date: Option<NaiveDate>,
    pub target_db: Option<String>,
    pub target_table: Option<String>,
}

/// Immutable configuration of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub country: String,
    pub company_code: i16,
    pub year: String,
    /// Two digits, `01`..`12`
    pub period: String,
    pub data_date: NaiveDate,
    /// Captured once so every row of the run carries the same value
    pub load_ts: NaiveDateTime,
    pub source: TableRef,
    pub target: TableRef,
}

impl RunContext {
    pub fn resolve(
        params: &RunParams,
        config: &Config,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Result<Self, ParamError> {
        let company_code = resolve_company_code(&config.companies, &params.country)?;
        if company_code != params.company_code {
            return Err(ParamError::CompanyCodeMismatch {
                given: params.company_code,
                resolved: company_code,
                country: params.country.clone(),
            });
        }

        let period = normalize_period(&params.period)?;
        let year = validate_year(&params.year)?;

        let data_date = params
            .data_date
            .unwrap_or_else(|| default_data_date(now, config.utc_offset_hours));

        let schema = identifier(
            "target database",
            params.target_db.as_deref().unwrap_or(&target.schema),
        )?;
        let table = identifier(
            "target table",
            params.target_table.as_deref().unwrap_or(&target.table),
        )?;

        Ok(Self {
            country: params.country.clone(),
            company_code,
            year,
            period,
            data_date,
            load_ts: local_now(now, config.utc_offset_hours),
            source: TableRef::new(&config.source.schema, &config.source.table),
            target: TableRef::new(schema, table),
        })
    }

    /// Month of source events to read, `YYYY-MM`.
    pub fn reporting_month(&self) -> String {
        format!("{}-{}", self.year, self.period)
    }

    /// Slice of the target table this run replaces.
    pub fn scope(&self) -> ScopePredicate {
        ScopePredicate::new(self.company_code, self.data_date)
    }
}

/// Wall clock in the reporting locale.
pub fn local_now(now: DateTime<Utc>, utc_offset_hours: i64) -> NaiveDateTime {
    (now + Duration::hours(utc_offset_hours)).naive_utc()
}

/// Yesterday in the reporting locale.
pub fn default_data_date(now: DateTime<Utc>, utc_offset_hours: i64) -> NaiveDate {
    local_now(now, utc_offset_hours).date() - Duration::days(1)
}

/// Look up the company code for a country (case-insensitive).
pub fn resolve_company_code(
    companies: &BTreeMap<String, i16>,
    country: &str,
) -> Result<i16, ParamError> {
    let key = country.trim().to_lowercase();
    companies
        .iter()
        .find(|(name, _)| name.to_lowercase() == key)
        .map(|(_, code)| *code)
        .ok_or_else(|| ParamError::UnmappedCountry {
            country: country.to_string(),
            known: companies.keys().cloned().collect::<Vec<_>>().join(", "),
        })
}

fn normalize_period(period: &str) -> Result<String, ParamError> {
    let trimmed = period.trim();
    match trimmed.parse::<u32>() {
        Ok(month @ 1..=12) if trimmed.len() <= 2 => Ok(format!("{:02}", month)),
        _ => Err(ParamError::InvalidPeriod(period.to_string())),
    }
}

fn validate_year(year: &str) -> Result<String, ParamError> {
    let trimmed = year.trim();
    if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Ok(trimmed.to_string())
    } else {
        Err(ParamError::InvalidYear(year.to_string()))
    }
}

fn identifier(field: &'static str, value: &str) -> Result<String, ParamError> {
    if is_identifier(value) {
        Ok(value.to_string())
    } else {
        Err(ParamError::InvalidIdentifier {
            field,
            value: value.to_string(),
        })
    }
}
