use chrono::NaiveDate;
use serde::{Serialize, Serializer};

/// Constant label carried by every structured notification.
pub const PAYLOAD_ENTITY: &str = "outliers";

#[derive(Debug, Clone)]
pub struct Config {
    pub slack_webhook_url: Option<String>,
    pub auto_send_enabled: bool,
    pub interval_seconds: u64,
    pub source_view: String,
    pub query_window: QueryWindow,
    pub pubsub_topic: Option<String>,
    pub gcp_project: Option<String>,
    pub notify_recipient: Option<String>,
    pub columns: ColumnConvention,
    pub missing_ratio_policy: MissingRatioPolicy,
    pub include_html_table: bool,
    pub access_token: Option<String>,
    pub port: u16,
}

/// Naming rules used to map the view's schema onto outlier records.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnConvention {
    pub flag_prefix: String,
    pub ratio_suffix: String,
    pub date_column: String,
    pub origin_column: String,
}

impl Default for ColumnConvention {
    fn default() -> Self {
        Self {
            flag_prefix: "is_outlier_".to_string(),
            ratio_suffix: "_ratio".to_string(),
            date_column: "date".to_string(),
            origin_column: "origin".to_string(),
        }
    }
}

/// Which dates a fetch covers, always ending at the reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryWindow {
    SingleDay,
    Lookback { days: u32 },
}

impl QueryWindow {
    /// First date included in the window, or `None` when the window reaches
    /// past the earliest representable date.
    pub fn start(&self, reference_date: NaiveDate) -> Option<NaiveDate> {
        match self {
            QueryWindow::SingleDay => Some(reference_date),
            QueryWindow::Lookback { days } => {
                let span = i64::from(days.saturating_sub(1));
                reference_date.checked_sub_signed(chrono::Duration::days(span))
            }
        }
    }
}

/// What to do with a raised flag whose ratio is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingRatioPolicy {
    #[default]
    Down,
    Omit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Up => "🔺",
            Direction::Down => "🔻",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierFlag {
    pub metric: String,
    pub ratio: Option<f64>,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutlierRecord {
    pub date: NaiveDate,
    pub origin: String,
    pub metrics: Vec<OutlierFlag>,
}

/// All metrics flagged for one origin, in fetch order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginItem {
    pub origin: String,
    pub metrics: Vec<OutlierFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredPayload {
    pub entity: &'static str,
    pub reference_date: Option<String>,
    pub items: Vec<OriginItem>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    Text(String),
    Structured(StructuredPayload),
}

impl NotificationPayload {
    /// Human readable rendering, used by chat sinks.
    pub fn summary(&self) -> &str {
        match self {
            NotificationPayload::Text(text) => text,
            NotificationPayload::Structured(payload) => &payload.summary,
        }
    }
}

impl Serialize for NotificationPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NotificationPayload::Text(text) => serializer.serialize_str(text),
            NotificationPayload::Structured(payload) => payload.serialize(serializer),
        }
    }
}

#[derive(Serialize)]
pub struct SlackPayload {
    pub text: String,
}

/// Opaque receipt from a sink, only ever logged.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryAck {
    Webhook(String),
    Queue { message_id: String },
}

impl std::fmt::Display for DeliveryAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryAck::Webhook(body) => write!(f, "webhook: {}", body),
            DeliveryAck::Queue { message_id } => write!(f, "message id {}", message_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub auto_send_enabled: bool,
}
