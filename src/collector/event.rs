//! Detection and recording events.
//!
//! Each refresh returns every event in a trailing window, so the collector
//! keeps a watermark (the latest `end` it has counted, plus the ids that
//! ended on that exact millisecond) and only counts completed events it has
//! not seen yet.
//!
//! The first poll after startup has no watermark and counts every completed
//! event in the refresh window (one hour unless the connector is built with
//! a different one).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use prometheus::{CounterVec, HistogramVec};

use crate::metrics::names::{self, label_or_unknown, labels};
use crate::metrics::{MetricRegistry, MetricSpec, MetricsError};
use crate::upstream::UpstreamGate;
use crate::upstream::types::ProtectEvent;

use super::error::CollectorError;
use super::traits::{Collector, CollectorContext, CollectorDescriptor, CollectorFactory, Tier};

pub const DESCRIPTOR: CollectorDescriptor = CollectorDescriptor {
    name: "event",
    description: "Counts UniFi Protect detection events",
    tier: Tier::Fast,
};

/// Upstream event type for plain motion.
const MOTION_EVENT: &str = "motion";

pub fn factory() -> CollectorFactory {
    CollectorFactory::new(DESCRIPTOR, |ctx: &CollectorContext| {
        let collector: Arc<dyn Collector> = Arc::new(EventCollector::new(
            Arc::clone(&ctx.gate),
            &ctx.metrics,
            EventOptions {
                collect_motion_events: ctx.settings.cameras.collect_motion_events,
                buckets: ctx.settings.monitoring.histogram_buckets.clone(),
            },
        )?);
        Ok(collector)
    })
}

#[derive(Debug, Clone)]
pub struct EventOptions {
    pub collect_motion_events: bool,
    pub buckets: Vec<f64>,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            collect_motion_events: true,
            buckets: crate::metrics::DEFAULT_BUCKETS.to_vec(),
        }
    }
}

pub struct EventCollector {
    gate: Arc<UpstreamGate>,
    options: EventOptions,
    count: CounterVec,
    duration: HistogramVec,
    watermark: Mutex<Watermark>,
}

/// Latest event end seen, in epoch milliseconds, and the events ending then.
#[derive(Debug, Default, Clone)]
struct Watermark {
    end: Option<i64>,
    ids: HashSet<String>,
}

impl Watermark {
    fn has_seen(&self, id: &str, end: i64) -> bool {
        match self.end {
            Some(mark) if end < mark => true,
            Some(mark) if end == mark => self.ids.contains(id),
            _ => false,
        }
    }

    fn advance(&mut self, id: &str, end: i64) {
        match self.end {
            Some(mark) if end < mark => {}
            Some(mark) if end == mark => {
                self.ids.insert(id.to_string());
            }
            _ => {
                self.end = Some(end);
                self.ids = HashSet::from([id.to_string()]);
            }
        }
    }
}

impl EventCollector {
    pub fn new(
        gate: Arc<UpstreamGate>,
        metrics: &MetricRegistry,
        options: EventOptions,
    ) -> Result<Self, MetricsError> {
        let count = metrics.counter(
            MetricSpec::new(names::EVENT_COUNT_TOTAL, "Total number of detection events")
                .labels(&[labels::EVENT_TYPE, labels::CAMERA_ID])
                .unit("events"),
        )?;
        let duration = metrics.histogram(
            MetricSpec::new(names::EVENT_DURATION_SECONDS, "Duration of detection events")
                .labels(&[labels::EVENT_TYPE])
                .unit("seconds")
                .buckets(options.buckets.clone()),
        )?;

        Ok(Self {
            gate,
            options,
            count,
            duration,
            watermark: Mutex::new(Watermark::default()),
        })
    }

    pub fn watermark(&self) -> Option<i64> {
        self.watermark.lock().unwrap_or_else(PoisonError::into_inner).end
    }

    fn wanted(&self, event: &ProtectEvent) -> bool {
        self.options.collect_motion_events || !event.kind.eq_ignore_ascii_case(MOTION_EVENT)
    }
}

#[async_trait]
impl Collector for EventCollector {
    fn descriptor(&self) -> &CollectorDescriptor {
        &DESCRIPTOR
    }

    async fn collect(&self) -> Result<(), CollectorError> {
        let snapshot = self.gate.get_snapshot().await?;
        let since = self
            .watermark
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut latest = since.clone();
        let mut counted = 0usize;
        for event in &snapshot.events {
            // Ongoing events are counted once they end.
            let Some(end) = event.end else { continue };
            if since.has_seen(&event.id, end) {
                continue;
            }
            if end < event.start {
                tracing::debug!(event_id = %event.id, "Skipping event that ends before it starts");
                continue;
            }
            latest.advance(&event.id, end);
            if !self.wanted(event) {
                continue;
            }

            let event_type = label_or_unknown(Some(event.kind.as_str()));
            self.count
                .with_label_values(&[event_type, label_or_unknown(event.camera.as_deref())])
                .inc();
            self.duration
                .with_label_values(&[event_type])
                .observe((end - event.start) as f64 / 1000.0);
            counted += 1;
        }

        *self.watermark.lock().unwrap_or_else(PoisonError::into_inner) = latest;
        tracing::debug!(
            counted,
            window = snapshot.events.len(),
            "Collected event metrics"
        );
        Ok(())
    }
}
