//! Namespaced, memoizing metric registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use prometheus::proto::MetricFamily;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Default namespace prefixed to every metric name.
pub const DEFAULT_NAMESPACE: &str = "unifi_protect";

/// Default histogram buckets, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Errors raised by the metric registry.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Underlying prometheus registry rejected the metric.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// A metric with this name exists with a different kind or label set.
    #[error("metric '{name}' already registered with a different schema: {reason}")]
    SchemaMismatch { name: String, reason: String },

    /// Text exposition produced invalid UTF-8.
    #[error("encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Instrument kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
    Info,
}

/// Declaration of a metric: name, help text, ordered label names.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub help: String,
    pub labels: Vec<String>,
    pub unit: Option<String>,
    pub buckets: Option<Vec<f64>>,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            labels: Vec::new(),
            unit: None,
            buckets: None,
        }
    }

    #[must_use]
    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| (*l).to_string()).collect();
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Histogram buckets; ignored for other kinds.
    #[must_use]
    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }
}

/// A registered instrument. Clones of the inner vec share storage.
///
/// `Info` is exposed as a gauge fixed at `1` whose labels carry the
/// information.
#[derive(Clone)]
pub enum Instrument {
    Gauge(GaugeVec),
    Counter(CounterVec),
    Histogram(HistogramVec),
    Info(GaugeVec),
}

impl Instrument {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
            Self::Histogram(_) => MetricKind::Histogram,
            Self::Info(_) => MetricKind::Info,
        }
    }

    pub fn as_gauge(&self) -> Option<&GaugeVec> {
        match self {
            Self::Gauge(g) | Self::Info(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<&CounterVec> {
        match self {
            Self::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&HistogramVec> {
        match self {
            Self::Histogram(h) => Some(h),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instrument").field(&self.kind()).finish()
    }
}

/// Handle to an info-style metric.
#[derive(Clone)]
pub struct InfoVec(GaugeVec);

impl InfoVec {
    /// Publish the given label values.
    pub fn set(&self, label_values: &[&str]) {
        self.0.with_label_values(label_values).set(1.0);
    }
}

struct Entry {
    kind: MetricKind,
    spec: MetricSpec,
    instrument: Arc<Instrument>,
}

/// Registry of named instruments under one namespace.
///
/// Creation is idempotent by full name: the first call registers the
/// instrument with the underlying [`prometheus::Registry`], later calls
/// return the same [`Arc<Instrument>`]. Instruments are never removed.
pub struct MetricRegistry {
    namespace: String,
    registry: Registry,
    instruments: RwLock<HashMap<String, Entry>>,
}

impl MetricRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            registry: Registry::new(),
            instruments: RwLock::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespaced metric name.
    pub fn full_name(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.namespace, name)
        }
    }

    /// Create an instrument, or return the existing one with this name.
    ///
    /// # Errors
    /// [`MetricsError::SchemaMismatch`] if the name is taken by a different
    /// kind or label set; [`MetricsError::Prometheus`] if the name or labels
    /// are invalid.
    pub fn create(&self, kind: MetricKind, spec: MetricSpec) -> Result<Arc<Instrument>, MetricsError> {
        let full_name = self.full_name(&spec.name);

        if let Some(entry) = self.read_entries().get(&full_name) {
            return Self::reuse(&full_name, entry, kind, &spec);
        }

        let mut instruments = self
            .instruments
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        // Lost a creation race: the winner's instrument is the one.
        if let Some(entry) = instruments.get(&full_name) {
            return Self::reuse(&full_name, entry, kind, &spec);
        }

        let labels: Vec<&str> = spec.labels.iter().map(String::as_str).collect();
        let instrument = match kind {
            MetricKind::Gauge => Instrument::Gauge(GaugeVec::new(
                Opts::new(full_name.clone(), spec.help.clone()),
                &labels,
            )?),
            MetricKind::Info => Instrument::Info(GaugeVec::new(
                Opts::new(full_name.clone(), spec.help.clone()),
                &labels,
            )?),
            MetricKind::Counter => Instrument::Counter(CounterVec::new(
                Opts::new(full_name.clone(), spec.help.clone()),
                &labels,
            )?),
            MetricKind::Histogram => {
                let buckets = spec
                    .buckets
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BUCKETS.to_vec());
                Instrument::Histogram(HistogramVec::new(
                    HistogramOpts::new(full_name.clone(), spec.help.clone()).buckets(buckets),
                    &labels,
                )?)
            }
        };

        match &instrument {
            Instrument::Gauge(v) | Instrument::Info(v) => self.registry.register(Box::new(v.clone()))?,
            Instrument::Counter(v) => self.registry.register(Box::new(v.clone()))?,
            Instrument::Histogram(v) => self.registry.register(Box::new(v.clone()))?,
        }

        tracing::debug!(
            name = %full_name,
            kind = %kind,
            labels = ?spec.labels,
            unit = spec.unit.as_deref().unwrap_or(""),
            "Created metric"
        );

        let instrument = Arc::new(instrument);
        instruments.insert(
            full_name,
            Entry {
                kind,
                spec,
                instrument: Arc::clone(&instrument),
            },
        );
        Ok(instrument)
    }

    pub fn gauge(&self, spec: MetricSpec) -> Result<GaugeVec, MetricsError> {
        let name = spec.name.clone();
        match self.create(MetricKind::Gauge, spec)?.as_ref() {
            Instrument::Gauge(g) => Ok(g.clone()),
            other => Err(self.kind_mismatch(&name, other.kind(), MetricKind::Gauge)),
        }
    }

    pub fn counter(&self, spec: MetricSpec) -> Result<CounterVec, MetricsError> {
        let name = spec.name.clone();
        match self.create(MetricKind::Counter, spec)?.as_ref() {
            Instrument::Counter(c) => Ok(c.clone()),
            other => Err(self.kind_mismatch(&name, other.kind(), MetricKind::Counter)),
        }
    }

    pub fn histogram(&self, spec: MetricSpec) -> Result<HistogramVec, MetricsError> {
        let name = spec.name.clone();
        match self.create(MetricKind::Histogram, spec)?.as_ref() {
            Instrument::Histogram(h) => Ok(h.clone()),
            other => Err(self.kind_mismatch(&name, other.kind(), MetricKind::Histogram)),
        }
    }

    pub fn info(&self, spec: MetricSpec) -> Result<InfoVec, MetricsError> {
        let name = spec.name.clone();
        match self.create(MetricKind::Info, spec)?.as_ref() {
            Instrument::Info(g) => Ok(InfoVec(g.clone())),
            other => Err(self.kind_mismatch(&name, other.kind(), MetricKind::Info)),
        }
    }

    /// Look up an instrument by its un-namespaced name.
    pub fn get(&self, name: &str) -> Option<Arc<Instrument>> {
        self.read_entries()
            .get(&self.full_name(name))
            .map(|entry| Arc::clone(&entry.instrument))
    }

    /// Number of registered instruments.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current value of one label set, without creating it.
    ///
    /// Gauges and info metrics report their value, counters their total,
    /// histograms their sample count. `None` means the label set has never
    /// been written.
    pub fn sample(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let full_name = self.full_name(name);
        let kind = self.read_entries().get(&full_name)?.kind;

        let families = self.registry.gather();
        let family = families.iter().find(|f| f.get_name() == full_name)?;
        let metric = family.get_metric().iter().find(|m| {
            let pairs = m.get_label();
            pairs.len() == labels.len()
                && labels.iter().all(|(k, v)| {
                    pairs
                        .iter()
                        .any(|p| p.get_name() == *k && p.get_value() == *v)
                })
        })?;

        Some(match kind {
            MetricKind::Gauge | MetricKind::Info => metric.get_gauge().get_value(),
            MetricKind::Counter => metric.get_counter().get_value(),
            MetricKind::Histogram => metric.get_histogram().get_sample_count() as f64,
        })
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn kind_mismatch(&self, name: &str, found: MetricKind, wanted: MetricKind) -> MetricsError {
        MetricsError::SchemaMismatch {
            name: self.full_name(name),
            reason: format!("registered as {found}, requested as {wanted}"),
        }
    }

    fn reuse(
        full_name: &str,
        entry: &Entry,
        kind: MetricKind,
        spec: &MetricSpec,
    ) -> Result<Arc<Instrument>, MetricsError> {
        if entry.kind != kind {
            return Err(MetricsError::SchemaMismatch {
                name: full_name.to_string(),
                reason: format!("registered as {}, requested as {}", entry.kind, kind),
            });
        }
        if entry.spec.labels != spec.labels {
            return Err(MetricsError::SchemaMismatch {
                name: full_name.to_string(),
                reason: format!(
                    "registered labels {:?}, requested {:?}",
                    entry.spec.labels, spec.labels
                ),
            });
        }
        if entry.spec.help != spec.help {
            tracing::debug!(name = %full_name, "Ignoring differing help text for existing metric");
        }
        Ok(Arc::clone(&entry.instrument))
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("namespace", &self.namespace)
            .field("instrument_count", &self.len())
            .finish_non_exhaustive()
    }
}
