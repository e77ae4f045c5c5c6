use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::collector::{default_reference_date, OutlierFetcher};
use crate::error::NotifierError;
use crate::publisher::Sink;
use crate::report::OutlierReport;
use crate::types::{Config, DeliveryAck};
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Format,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Format => "format",
            Stage::Publish => "publish",
        })
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Delivered(DeliveryAck),
    Failed { stage: Stage, error: NotifierError },
}

impl CycleOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, CycleOutcome::Delivered(_))
    }
}

/// Runs fetch, format and publish once per interval, one cycle at a time.
///
/// The wait starts when a cycle ends, so a slow cycle pushes the next one
/// back by its own duration. There is no catch-up and no retry.
pub struct Scheduler {
    config: Arc<Config>,
    warehouse: Arc<dyn Warehouse>,
    sink: Arc<dyn Sink>,
}

impl Scheduler {
    pub fn new(config: Arc<Config>, warehouse: Arc<dyn Warehouse>, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            warehouse,
            sink,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds)
    }

    /// Spawn the loop, or return `None` when automatic sending is disabled.
    pub fn spawn_if_enabled(self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.config.auto_send_enabled {
            info!("automatic sending disabled, scheduler not started");
            return None;
        }
        Some(tokio::spawn(self.run(shutdown)))
    }

    /// Loop until the shutdown signal fires (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.interval();
        info!(interval_secs = interval.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
            self.run_cycle().await;
        }
    }

    /// One fetch, format, publish pass for yesterday's outliers.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_cycle_for(default_reference_date()).await
    }

    pub async fn run_cycle_for(&self, reference_date: NaiveDate) -> CycleOutcome {
        let outcome = match self.try_cycle(reference_date).await {
            Ok(ack) => CycleOutcome::Delivered(ack),
            Err((stage, error)) => CycleOutcome::Failed { stage, error },
        };
        match &outcome {
            CycleOutcome::Delivered(ack) => {
                info!(reference_date = %reference_date, ack = %ack, "cycle completed");
            }
            CycleOutcome::Failed { stage, error } => {
                error!(stage = %stage, error = %error, reference_date = %reference_date, "cycle failed");
            }
        }
        outcome
    }

    async fn try_cycle(&self, reference_date: NaiveDate) -> Result<DeliveryAck, (Stage, NotifierError)> {
        let records = OutlierFetcher::new(self.warehouse.as_ref(), &self.config)
            .fetch(reference_date)
            .await
            .map_err(|e| (Stage::Fetch, e))?;

        let report = OutlierReport::new(reference_date, self.config.query_window, &records);
        let summary = report.summary();
        info!(
            origins = summary.origin_count,
            metrics = summary.metric_count,
            "outlier report built"
        );
        let payload = self.sink.payload_for(&report).map_err(|e| (Stage::Format, e))?;

        self.sink.publish(&payload).await.map_err(|e| (Stage::Publish, e))
    }
}
