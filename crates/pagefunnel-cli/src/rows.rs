//! Typed view of the page funnel table.

use crate::counters::{counter_index, COUNTERS};
use arrow::array::{
    Array, ArrayRef, Date32Array, Int16Array, Int64Array, RecordBatch, StringArray,
    TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RowDecodeError {
    #[error("Column '{0}' is missing")]
    MissingColumn(String),

    #[error("Column '{column}' cannot be read as {expected}: {message}")]
    WrongType {
        column: String,
        expected: &'static str,
        message: String,
    },

    #[error("Column '{column}' is NULL in row {row}")]
    UnexpectedNull { column: String, row: usize },
}

/// One row of the page funnel table.
#[derive(Debug, Clone, PartialEq)]
pub struct PageFunnelRow {
    pub company_code: i16,
    pub subject_id: String,
    pub month: String,
    /// In [`COUNTERS`] order
    pub counters: Vec<Option<i64>>,
    pub data_date: NaiveDate,
    pub load_ts: NaiveDateTime,
}

impl PageFunnelRow {
    /// Value of a counter by column name; `None` for unknown names.
    pub fn counter(&self, name: &str) -> Option<i64> {
        counter_index(name).and_then(|i| self.counters.get(i).copied().flatten())
    }

    /// (company code, subject, month); at most one row per key. The data
    /// date is not part of it, so two runs stamped on different days of the
    /// same month collide.
    pub fn key(&self) -> (i16, &str, &str) {
        (
            self.company_code,
            self.subject_id.as_str(),
            self.month.as_str(),
        )
    }
}

fn column(batch: &RecordBatch, name: &str, to: &DataType) -> Result<ArrayRef, RowDecodeError> {
    let array = batch
        .column_by_name(name)
        .ok_or_else(|| RowDecodeError::MissingColumn(name.to_string()))?;

    cast(array, to).map_err(|e| RowDecodeError::WrongType {
        column: name.to_string(),
        expected: type_label(to),
        message: e.to_string(),
    })
}

fn type_label(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Int16 => "SMALLINT",
        DataType::Int64 => "BIGINT",
        DataType::Utf8 => "VARCHAR",
        DataType::Date32 => "DATE",
        _ => "TIMESTAMP",
    }
}

fn downcast<'a, T: 'static>(
    array: &'a ArrayRef,
    name: &str,
    to: &DataType,
) -> Result<&'a T, RowDecodeError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RowDecodeError::WrongType {
            column: name.to_string(),
            expected: type_label(to),
            message: format!("got {}", array.data_type()),
        })
}

fn not_null(array: &dyn Array, column: &str, row: usize) -> Result<(), RowDecodeError> {
    if array.is_null(row) {
        Err(RowDecodeError::UnexpectedNull {
            column: column.to_string(),
            row,
        })
    } else {
        Ok(())
    }
}

/// Decode query results shaped like the page funnel table.
///
/// Columns are matched by name, so extra columns are ignored and the order
/// does not matter. Counter columns may be NULL; the key columns may not.
pub fn rows_from_batches(batches: &[RecordBatch]) -> Result<Vec<PageFunnelRow>, RowDecodeError> {
    let ts_type = DataType::Timestamp(TimeUnit::Microsecond, None);
    let mut rows = Vec::new();

    for batch in batches {
        let codes = column(batch, "COMPANY_CODE", &DataType::Int16)?;
        let codes = downcast::<Int16Array>(&codes, "COMPANY_CODE", &DataType::Int16)?;
        let subjects = column(batch, "Hash_ID", &DataType::Utf8)?;
        let subjects = downcast::<StringArray>(&subjects, "Hash_ID", &DataType::Utf8)?;
        let months = column(batch, "month", &DataType::Utf8)?;
        let months = downcast::<StringArray>(&months, "month", &DataType::Utf8)?;
        let dates = column(batch, "DP_DATA_DT", &DataType::Date32)?;
        let dates = downcast::<Date32Array>(&dates, "DP_DATA_DT", &DataType::Date32)?;
        let load = column(batch, "DP_LOAD_TS", &ts_type)?;
        let load = downcast::<TimestampMicrosecondArray>(&load, "DP_LOAD_TS", &ts_type)?;

        let counter_arrays = COUNTERS
            .iter()
            .map(|c| column(batch, c.name, &DataType::Int64))
            .collect::<Result<Vec<_>, _>>()?;
        let counters = counter_arrays
            .iter()
            .zip(COUNTERS.iter())
            .map(|(array, c)| downcast::<Int64Array>(array, c.name, &DataType::Int64))
            .collect::<Result<Vec<_>, _>>()?;

        for row in 0..batch.num_rows() {
            not_null(codes, "COMPANY_CODE", row)?;
            not_null(subjects, "Hash_ID", row)?;
            not_null(months, "month", row)?;
            not_null(dates, "DP_DATA_DT", row)?;
            not_null(load, "DP_LOAD_TS", row)?;

            let data_date = dates
                .value_as_date(row)
                .ok_or_else(|| RowDecodeError::WrongType {
                    column: "DP_DATA_DT".to_string(),
                    expected: "DATE",
                    message: format!("day {} out of range", dates.value(row)),
                })?;
            let load_ts = load
                .value_as_datetime(row)
                .ok_or_else(|| RowDecodeError::WrongType {
                    column: "DP_LOAD_TS".to_string(),
                    expected: "TIMESTAMP",
                    message: format!("{}us out of range", load.value(row)),
                })?;

            rows.push(PageFunnelRow {
                company_code: codes.value(row),
                subject_id: subjects.value(row).to_string(),
                month: months.value(row).to_string(),
                counters: counters
                    .iter()
                    .map(|a| (!a.is_null(row)).then(|| a.value(row)))
                    .collect(),
                data_date,
                load_ts,
            });
        }
    }

    Ok(rows)
}
