use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::parsing::{format_date, format_ratio};
use crate::types::{OriginItem, OutlierRecord, QueryWindow, StructuredPayload, PAYLOAD_ENTITY};

/// Outliers from one fetch, grouped by origin for rendering
pub struct OutlierReport {
    pub reference_date: NaiveDate,
    pub window: QueryWindow,
    pub items: Vec<OriginItem>,
}

impl OutlierReport {
    /// Group records by origin. Origins are sorted lexicographically; metrics
    /// keep fetch order within their origin.
    pub fn new(reference_date: NaiveDate, window: QueryWindow, records: &[OutlierRecord]) -> Self {
        let mut grouped: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(record.origin.as_str())
                .or_default()
                .extend(record.metrics.iter().cloned());
        }
        let items = grouped
            .into_iter()
            .map(|(origin, metrics)| OriginItem {
                origin: origin.to_string(),
                metrics,
            })
            .collect();

        Self {
            reference_date,
            window,
            items,
        }
    }

    pub fn has_outliers(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            origin_count: self.items.len(),
            metric_count: self.items.iter().map(|i| i.metrics.len()).sum(),
        }
    }

    fn window_phrase(&self) -> String {
        let date = format_date(self.reference_date);
        match self.window {
            QueryWindow::SingleDay => format!("for {}", date),
            QueryWindow::Lookback { days } => format!("in the last {} days (through {})", days, date),
        }
    }

    /// Plain text rendering used by chat sinks and as the structured summary
    pub fn render_text(&self) -> String {
        if !self.has_outliers() {
            return format!("No outliers found {}.", self.window_phrase());
        }

        let mut lines = vec![format!("Outliers detected {}:", self.window_phrase())];
        for item in &self.items {
            lines.push(format!("- {}:", item.origin));
            for flag in &item.metrics {
                lines.push(format!(
                    "  {} {} (ratio {})",
                    flag.direction.arrow(),
                    flag.metric,
                    format_ratio(flag.ratio)
                ));
            }
        }
        lines.join("\n")
    }

    /// One table row per metric: origin, metric, direction, ratio
    pub fn render_html_table(&self) -> String {
        let mut html = String::from(
            "<table>\n<tr><th>Origin</th><th>Metric</th><th>Direction</th><th>Ratio</th></tr>\n",
        );
        for item in &self.items {
            for flag in &item.metrics {
                html.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{} {}</td><td>{}</td></tr>\n",
                    escape_html(&item.origin),
                    escape_html(&flag.metric),
                    flag.direction.arrow(),
                    flag.direction.as_str(),
                    format_ratio(flag.ratio)
                ));
            }
        }
        html.push_str("</table>");
        html
    }

    pub fn to_structured(&self, include_html: bool) -> StructuredPayload {
        let reference_date = match self.window {
            QueryWindow::SingleDay => Some(format_date(self.reference_date)),
            QueryWindow::Lookback { .. } => None,
        };
        StructuredPayload {
            entity: PAYLOAD_ENTITY,
            reference_date,
            items: self.items.clone(),
            summary: self.render_text(),
            html: include_html.then(|| self.render_html_table()),
        }
    }
}

pub struct ReportSummary {
    pub origin_count: usize,
    pub metric_count: usize,
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, OutlierFlag};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn flag(metric: &str, ratio: Option<f64>, direction: Direction) -> OutlierFlag {
        OutlierFlag {
            metric: metric.to_string(),
            ratio,
            direction,
        }
    }

    fn record(origin: &str, metrics: Vec<OutlierFlag>) -> OutlierRecord {
        OutlierRecord {
            date: date(2024, 1, 10),
            origin: origin.to_string(),
            metrics,
        }
    }

    #[test]
    fn test_render_text_single_record() {
        let records = vec![record("A", vec![flag("sales", Some(1.5), Direction::Up)])];
        let report = OutlierReport::new(date(2024, 1, 10), QueryWindow::SingleDay, &records);

        let text = report.render_text();
        assert_eq!(text, "Outliers detected for 10/01/2024:\n- A:\n  🔺 sales (ratio 1.500)");
    }

    #[test]
    fn test_render_text_empty() {
        let report = OutlierReport::new(date(2024, 1, 9), QueryWindow::SingleDay, &[]);
        assert_eq!(report.render_text(), "No outliers found for 09/01/2024.");

        let report = OutlierReport::new(date(2024, 1, 9), QueryWindow::Lookback { days: 10 }, &[]);
        assert_eq!(
            report.render_text(),
            "No outliers found in the last 10 days (through 09/01/2024)."
        );
    }

    #[test]
    fn test_origins_sorted_and_merged() {
        let records = vec![
            record("zeta", vec![flag("orders", Some(0.5), Direction::Down)]),
            record("alpha", vec![flag("sales", None, Direction::Down)]),
            record("zeta", vec![flag("visits", Some(3.0), Direction::Up)]),
        ];
        let report = OutlierReport::new(date(2024, 1, 10), QueryWindow::SingleDay, &records);

        let origins: Vec<&str> = report.items.iter().map(|i| i.origin.as_str()).collect();
        assert_eq!(origins, vec!["alpha", "zeta"]);
        assert_eq!(report.items[1].metrics[0].metric, "orders");
        assert_eq!(report.items[1].metrics[1].metric, "visits");

        let text = report.render_text();
        assert!(text.contains("- alpha:\n  🔻 sales (ratio n/a)"));
        assert!(text.contains("- zeta:\n  🔻 orders (ratio 0.500)\n  🔺 visits (ratio 3.000)"));

        let summary = report.summary();
        assert_eq!(summary.origin_count, 2);
        assert_eq!(summary.metric_count, 3);
    }

    #[test]
    fn test_render_html_table() {
        let records = vec![record("<B&B>", vec![flag("sales", Some(1.23456), Direction::Up)])];
        let report = OutlierReport::new(date(2024, 1, 10), QueryWindow::SingleDay, &records);

        let html = report.render_html_table();
        assert!(html.starts_with("<table>"));
        assert!(html.ends_with("</table>"));
        assert!(html.contains("<tr><td>&lt;B&amp;B&gt;</td><td>sales</td><td>🔺 up</td><td>1.235</td></tr>"));
    }

    #[test]
    fn test_structured_payload() {
        let records = vec![record("A", vec![flag("sales", Some(1.5), Direction::Up)])];
        let report = OutlierReport::new(date(2024, 1, 10), QueryWindow::SingleDay, &records);

        let payload = report.to_structured(false);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["entity"], "outliers");
        assert_eq!(json["reference_date"], "10/01/2024");
        assert_eq!(json["items"][0]["origin"], "A");
        assert_eq!(json["items"][0]["metrics"][0]["metric"], "sales");
        assert_eq!(json["items"][0]["metrics"][0]["ratio"], 1.5);
        assert_eq!(json["items"][0]["metrics"][0]["direction"], "up");
        assert_eq!(json["summary"], report.render_text());
        assert!(json.get("html").is_none());

        let with_html = report.to_structured(true);
        assert_eq!(with_html.html, Some(report.render_html_table()));
    }

    #[test]
    fn test_lookback_payload_has_null_reference_date() {
        let report = OutlierReport::new(date(2024, 1, 10), QueryWindow::Lookback { days: 7 }, &[]);
        let json = serde_json::to_value(report.to_structured(false)).unwrap();
        assert!(json["reference_date"].is_null());
        assert_eq!(json["items"], serde_json::json!([]));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
        assert_eq!(escape_html("plain"), "plain");
    }
}
