// Public modules
pub mod types;
pub mod error;
pub mod config;
pub mod parsing;
pub mod auth;
pub mod warehouse;
pub mod collector;
pub mod report;
pub mod slack;
pub mod pubsub;
pub mod publisher;
pub mod scheduler;
pub mod server;

// Re-export commonly used items
pub use types::*;
pub use error::NotifierError;
pub use config::{load_config, load_config_with_env, EnvironmentProvider, SystemEnvironment, MockEnvironment};
pub use parsing::{classify_direction, format_date, format_ratio, metric_from_flag_column, ratio_column_for};
pub use warehouse::{BigQueryClient, QueryRequest, QueryResult, Warehouse};
pub use collector::{build_query, map_rows, OutlierFetcher};
pub use report::{OutlierReport, ReportSummary};
pub use slack::{build_slack_payload, send_to_slack};
pub use publisher::{Destination, Publisher, Sink};
pub use scheduler::{CycleOutcome, Scheduler, Stage};
pub use server::build_router;
