use serde::{Deserialize, Serialize};

/// How the primary time column is stored, governing bucket and filter
/// arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateTimeType {
    /// Wall-clock seconds (`DateTime`)
    #[default]
    #[serde(rename = "DATETIME")]
    DateTime,
    /// Sub-second fixed-point wall clock (`DateTime64`)
    #[serde(rename = "DATETIME64")]
    DateTime64,
    /// Epoch seconds stored as a float
    #[serde(rename = "FLOAT")]
    Float,
    /// Epoch seconds stored as an integer
    #[serde(rename = "TIMESTAMP")]
    Timestamp,
    /// Epoch milliseconds
    #[serde(rename = "TIMESTAMP64_3")]
    Timestamp64Milli,
    /// Epoch microseconds
    #[serde(rename = "TIMESTAMP64_6")]
    Timestamp64Micro,
    /// Epoch nanoseconds
    #[serde(rename = "TIMESTAMP64_9")]
    Timestamp64Nano,
}

/// Configuration record for one expansion call.
///
/// Callers hand one of these next to the query text; the engine never keeps
/// state between calls. The record round-trips through JSON so services and
/// the CLI can pass it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryContext {
    /// Explicit bucket width, e.g. `15s`. Empty means derive one from the
    /// time span and `max_data_points`.
    pub interval: String,
    pub interval_factor: i64,
    /// Timestamp rounding step, e.g. `1m`. Empty or zero disables rounding.
    pub round: String,
    /// Range start, epoch seconds.
    pub from: i64,
    /// Range end, epoch seconds.
    pub to: i64,
    pub max_data_points: i64,
    pub database: String,
    pub table: String,
    /// Optional date column; empty disables the date-range prefilter.
    pub date_col: String,
    pub date_time_col: String,
    pub date_time_type: DateTimeType,
    pub skip_comments: bool,
    pub add_metadata: bool,
    /// Use lag-offset window arithmetic instead of running differences in
    /// the macro families.
    pub use_window_funcs: bool,
}

impl Default for QueryContext {
    fn default() -> Self {
        QueryContext {
            interval: String::new(),
            interval_factor: 1,
            round: String::new(),
            from: 0,
            to: 0,
            max_data_points: 0,
            database: "default".to_string(),
            table: String::new(),
            date_col: String::new(),
            date_time_col: String::new(),
            date_time_type: DateTimeType::DateTime,
            skip_comments: false,
            add_metadata: false,
            use_window_funcs: false,
        }
    }
}
