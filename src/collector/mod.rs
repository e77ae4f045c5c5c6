use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info};

use crate::error::{NotifierError, Result};
use crate::parsing::{
    classify_direction, is_valid_column_name, is_valid_view_identifier, metric_from_flag_column, parse_bool_cell,
    parse_date_cell, parse_ratio_cell, parse_text_cell, ratio_column_for,
};
use crate::types::{ColumnConvention, Config, MissingRatioPolicy, OutlierFlag, OutlierRecord, QueryWindow};
use crate::warehouse::{QueryRequest, QueryResult, Warehouse};

static NULL_CELL: serde_json::Value = serde_json::Value::Null;

/// Reads flagged rows from the outlier view and turns them into records
pub struct OutlierFetcher<'a, W: Warehouse + ?Sized> {
    warehouse: &'a W,
    config: &'a Config,
}

impl<'a, W: Warehouse + ?Sized> OutlierFetcher<'a, W> {
    pub fn new(warehouse: &'a W, config: &'a Config) -> Self {
        Self { warehouse, config }
    }

    /// Fetch outliers for the window ending yesterday (UTC)
    pub async fn fetch_latest(&self) -> Result<Vec<OutlierRecord>> {
        self.fetch(default_reference_date()).await
    }

    /// Fetch outliers for the window ending at `reference_date`
    pub async fn fetch(&self, reference_date: NaiveDate) -> Result<Vec<OutlierRecord>> {
        let request = build_query(
            &self.config.source_view,
            &self.config.columns,
            self.config.query_window,
            reference_date,
        )?;
        debug!(sql = %request.sql, "querying outlier view");

        let result = self.warehouse.query(&request).await?;
        let records = map_rows(&result, &self.config.columns, self.config.missing_ratio_policy)?;

        info!(
            view = %self.config.source_view,
            reference_date = %reference_date,
            rows = result.rows.len(),
            records = records.len(),
            "fetched outliers"
        );
        Ok(records)
    }
}

pub fn default_reference_date() -> NaiveDate {
    Utc::now().date_naive() - Duration::days(1)
}

/// Build the window query. The view and date column names are validated
/// because they cannot be passed as parameters.
pub fn build_query(
    view: &str,
    columns: &ColumnConvention,
    window: QueryWindow,
    reference_date: NaiveDate,
) -> Result<QueryRequest> {
    if !is_valid_view_identifier(view) {
        return Err(NotifierError::Configuration(format!("invalid source view identifier '{}'", view)));
    }
    let date_column = &columns.date_column;
    if !is_valid_column_name(date_column) {
        return Err(NotifierError::Configuration(format!("invalid date column name '{}'", date_column)));
    }
    let reference = reference_date.format("%Y-%m-%d").to_string();
    let request = match window {
        QueryWindow::SingleDay => QueryRequest {
            sql: format!(
                "SELECT * FROM `{view}` WHERE `{col}` = @reference_date ORDER BY `{col}` DESC",
                view = view,
                col = date_column
            ),
            date_params: vec![("reference_date".to_string(), reference)],
        },
        QueryWindow::Lookback { days } => {
            let start = window.start(reference_date).ok_or_else(|| {
                NotifierError::Configuration(format!(
                    "lookback of {} days before {} is out of range",
                    days, reference_date
                ))
            })?;
            QueryRequest {
                sql: format!(
                    "SELECT * FROM `{view}` WHERE `{col}` BETWEEN @start_date AND @reference_date ORDER BY `{col}` DESC",
                    view = view,
                    col = date_column
                ),
                date_params: vec![
                    ("start_date".to_string(), start.format("%Y-%m-%d").to_string()),
                    ("reference_date".to_string(), reference),
                ],
            }
        }
    };
    Ok(request)
}

/// Map a query result onto outlier records.
///
/// Rows without any raised flag are dropped. Row order is preserved apart
/// from a stable sort by date descending.
pub fn map_rows(
    result: &QueryResult,
    columns: &ColumnConvention,
    policy: MissingRatioPolicy,
) -> Result<Vec<OutlierRecord>> {
    let date_idx = required_column(result, &columns.date_column)?;
    let origin_idx = required_column(result, &columns.origin_column)?;

    // (metric, flag column index, ratio column index)
    let flag_columns: Vec<(String, usize, Option<usize>)> = result.columns
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| {
            metric_from_flag_column(name, &columns.flag_prefix).map(|metric| {
                let ratio_idx = result.column_index(&ratio_column_for(metric, &columns.ratio_suffix));
                (metric.to_string(), idx, ratio_idx)
            })
        })
        .collect();

    let mut records = Vec::new();
    for (row_no, row) in result.rows.iter().enumerate() {
        let cell = |idx: usize| row.get(idx).unwrap_or(&NULL_CELL);

        let mut metrics = Vec::new();
        for (metric, flag_idx, ratio_idx) in &flag_columns {
            let raised = parse_bool_cell(cell(*flag_idx)).ok_or_else(|| {
                NotifierError::Mapping(format!("row {}: flag column for '{}' is not boolean", row_no, metric))
            })?;
            if !raised {
                continue;
            }
            let ratio = match ratio_idx {
                Some(idx) => parse_ratio_cell(cell(*idx)).ok_or_else(|| {
                    NotifierError::Mapping(format!("row {}: ratio for '{}' is not numeric", row_no, metric))
                })?,
                None => None,
            };
            if let Some(direction) = classify_direction(ratio, policy) {
                metrics.push(OutlierFlag {
                    metric: metric.clone(),
                    ratio,
                    direction,
                });
            }
        }
        if metrics.is_empty() {
            continue;
        }

        let date = parse_date_cell(cell(date_idx)).ok_or_else(|| {
            NotifierError::Mapping(format!("row {}: '{}' is not a date", row_no, columns.date_column))
        })?;
        let origin = parse_text_cell(cell(origin_idx)).ok_or_else(|| {
            NotifierError::Mapping(format!("row {}: '{}' is empty", row_no, columns.origin_column))
        })?;
        records.push(OutlierRecord { date, origin, metrics });
    }

    records.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(records)
}

fn required_column(result: &QueryResult, name: &str) -> Result<usize> {
    result.column_index(name).ok_or_else(|| {
        NotifierError::Mapping(format!("expected column '{}' is missing from the view", name))
    })
}
