use anyhow::{anyhow, Result};
use std::collections::HashMap;
use crate::types::{ColumnConvention, Config, MissingRatioPolicy, QueryWindow};

const DEFAULT_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_LOOKBACK_DAYS: u32 = 10;
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SOURCE_VIEW: &str = "analytics.outliers_view";

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn load_config() -> Result<Config> {
    load_config_with_env(&SystemEnvironment)
}

/// Build the immutable startup configuration.
///
/// Destination settings are only checked for presence at send time, so a
/// service with no sink configured still starts and answers health checks.
pub fn load_config_with_env<E: EnvironmentProvider>(env: &E) -> Result<Config> {
    let slack_webhook_url = non_empty(env, "SLACK_WEBHOOK_URL");

    let auto_send_enabled = env.get_var("AUTO_SEND_ENABLED")
        .map(|v| parse_flag(&v))
        .unwrap_or(true);

    let interval_seconds: u64 = env.get_var("AUTO_SEND_INTERVAL_SECONDS")
        .and_then(|v| v.trim().parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_INTERVAL_SECONDS);

    let source_view = non_empty(env, "OUTLIER_VIEW")
        .unwrap_or_else(|| DEFAULT_SOURCE_VIEW.to_string());

    let lookback_days: u32 = env.get_var("LOOKBACK_DAYS")
        .and_then(|v| v.trim().parse().ok())
        .filter(|days| *days > 0)
        .unwrap_or(DEFAULT_LOOKBACK_DAYS);

    let query_window = match env.get_var("QUERY_WINDOW").as_deref().map(str::trim) {
        None | Some("") | Some("single-day") => QueryWindow::SingleDay,
        Some("lookback") => QueryWindow::Lookback { days: lookback_days },
        Some(other) => {
            return Err(anyhow!("Invalid QUERY_WINDOW '{}': expected single-day or lookback", other));
        }
    };

    let missing_ratio_policy = match env.get_var("MISSING_RATIO_POLICY").as_deref().map(str::trim) {
        None | Some("") | Some("down") => MissingRatioPolicy::Down,
        Some("omit") => MissingRatioPolicy::Omit,
        Some(other) => {
            return Err(anyhow!("Invalid MISSING_RATIO_POLICY '{}': expected down or omit", other));
        }
    };

    let defaults = ColumnConvention::default();
    let columns = ColumnConvention {
        flag_prefix: non_empty(env, "FLAG_COLUMN_PREFIX").unwrap_or(defaults.flag_prefix),
        ratio_suffix: non_empty(env, "RATIO_COLUMN_SUFFIX").unwrap_or(defaults.ratio_suffix),
        date_column: non_empty(env, "DATE_COLUMN").unwrap_or(defaults.date_column),
        origin_column: non_empty(env, "ORIGIN_COLUMN").unwrap_or(defaults.origin_column),
    };

    let include_html_table = env.get_var("INCLUDE_HTML_TABLE")
        .map(|v| parse_flag(&v))
        .unwrap_or(false);

    let port: u16 = env.get_var("PORT")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_PORT);

    Ok(Config {
        slack_webhook_url,
        auto_send_enabled,
        interval_seconds,
        source_view,
        query_window,
        pubsub_topic: non_empty(env, "PUBSUB_TOPIC"),
        gcp_project: non_empty(env, "GCP_PROJECT"),
        notify_recipient: non_empty(env, "NOTIFY_RECIPIENT"),
        columns,
        missing_ratio_policy,
        include_html_table,
        access_token: non_empty(env, "GOOGLE_ACCESS_TOKEN"),
        port,
    })
}

fn non_empty<E: EnvironmentProvider>(env: &E, key: &str) -> Option<String> {
    env.get_var(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True")
}
