//! Scrape orchestration and Prometheus text rendering.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kea_common::{EndpointLiveness, EndpointStatus};
use kea_control::{ControlChannel, ControlError, KeaEndpoint, TransportError};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ExporterConfig;
use crate::error::MappingError;
use crate::families::{MetricFamily, MetricSample};
use crate::mapping::StatsMapper;

/// Timing knobs for scrapes.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeSettings {
    /// Minimum age of discovery state before it is refreshed.
    pub reload_interval: Duration,
    /// Budget for one endpoint within a scrape.
    pub endpoint_timeout: Duration,
    /// Budget for the whole scrape.
    pub deadline: Duration,
    /// Requests closer together than this reuse the previous page.
    pub min_interval: Duration,
}

impl ScrapeSettings {
    pub fn from_config(config: &ExporterConfig) -> Self {
        Self {
            reload_interval: config.reload_interval(),
            endpoint_timeout: config.endpoint_timeout().min(config.scrape_deadline()),
            deadline: config.scrape_deadline(),
            min_interval: config.min_scrape_interval(),
        }
    }
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self::from_config(&ExporterConfig::default())
    }
}

/// Collector statistics.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Scrapes performed (cached pages not counted).
    pub scrapes: u64,
    /// Endpoint scrapes that failed or timed out.
    pub endpoint_failures: u64,
    /// Scrapes cut short by the overall deadline.
    pub deadlines_exceeded: u64,
}

/// Samples gathered by one scrape.
#[derive(Debug, Clone, Default)]
pub struct ScrapeResult {
    /// Samples grouped by endpoint, in configuration order.
    pub samples: Vec<MetricSample>,
    /// Number of endpoints reported down.
    pub failed: usize,
}

struct EndpointOutcome {
    samples: Result<Vec<MetricSample>, ControlError>,
    elapsed: Duration,
}

/// Scrapes every configured endpoint and renders the result.
pub struct ScrapeCollector<C> {
    endpoints: Vec<Arc<KeaEndpoint<C>>>,
    liveness: Mutex<Vec<EndpointLiveness>>,
    mapper: Arc<StatsMapper>,
    up: Arc<MetricFamily>,
    duration: Arc<MetricFamily>,
    settings: ScrapeSettings,
    prefix: String,
    page: tokio::sync::Mutex<Option<(Instant, String)>>,
    stats: RwLock<CollectorStats>,
}

impl<C: ControlChannel + 'static> ScrapeCollector<C> {
    /// Create a collector over the given clients.
    ///
    /// Clients sharing an identity would produce colliding series; only the
    /// first one is kept.
    pub fn new(
        clients: Vec<C>,
        mapper: Arc<StatsMapper>,
        settings: ScrapeSettings,
        prefix: impl Into<String>,
    ) -> Result<Self, MappingError> {
        let registry = mapper.registry();
        let up = registry.get_or_create(&MetricFamily::gauge(
            "up",
            "Whether the last scrape of the Kea endpoint succeeded",
            &["server"],
        ))?;
        let duration = registry.get_or_create(&MetricFamily::gauge(
            "scrape_duration_seconds",
            "Time spent scraping the Kea endpoint",
            &["server"],
        ))?;

        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(clients.len());
        for client in clients {
            if !seen.insert(client.identity().to_string()) {
                warn!(endpoint = %client.identity(), "Ignoring duplicate endpoint");
                continue;
            }
            endpoints.push(Arc::new(KeaEndpoint::new(client)));
        }

        let liveness = endpoints
            .iter()
            .map(|e| EndpointLiveness::new(e.identity()))
            .collect();

        Ok(Self {
            endpoints,
            liveness: Mutex::new(liveness),
            mapper,
            up,
            duration,
            settings,
            prefix: prefix.into(),
            page: tokio::sync::Mutex::new(None),
            stats: RwLock::new(CollectorStats::default()),
        })
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn endpoint(&self, index: usize) -> Option<&Arc<KeaEndpoint<C>>> {
        self.endpoints.get(index)
    }

    /// Ready once any endpoint has completed discovery.
    pub fn is_ready(&self) -> bool {
        self.endpoints.iter().any(|e| e.is_loaded())
    }

    pub fn liveness(&self) -> Vec<EndpointLiveness> {
        self.liveness.lock().clone()
    }

    pub fn stats(&self) -> CollectorStats {
        self.stats.read().clone()
    }

    /// Scrape all endpoints concurrently.
    ///
    /// Failing endpoints contribute an `up` sample of 0 and never fail the
    /// scrape. Endpoints still pending at the deadline are aborted and
    /// reported down.
    pub async fn scrape(&self) -> ScrapeResult {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let endpoint = endpoint.clone();
            let mapper = self.mapper.clone();
            let settings = self.settings;

            tasks.spawn(async move {
                let begun = Instant::now();
                let samples = match tokio::time::timeout(
                    settings.endpoint_timeout,
                    scrape_endpoint(&endpoint, &mapper, settings.reload_interval),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(format!(
                        "endpoint scrape exceeded {:?}",
                        settings.endpoint_timeout
                    ))
                    .into()),
                };
                (
                    index,
                    EndpointOutcome {
                        samples,
                        elapsed: begun.elapsed(),
                    },
                )
            });
        }

        let mut outcomes: Vec<Option<EndpointOutcome>> =
            self.endpoints.iter().map(|_| None).collect();
        let deadline = tokio::time::sleep(self.settings.deadline);
        tokio::pin!(deadline);

        let mut deadline_exceeded = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                    Some(Err(e)) => warn!(error = %e, "Endpoint scrape task failed"),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        pending = tasks.len(),
                        deadline = ?self.settings.deadline,
                        "Scrape deadline reached, aborting pending endpoints"
                    );
                    tasks.abort_all();
                    deadline_exceeded = true;
                    break;
                }
            }
        }

        let mut result = ScrapeResult::default();
        let mut liveness = self.liveness.lock();
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let server = endpoint.identity();
            let state = &mut liveness[index];

            let elapsed = match outcomes[index].take() {
                Some(EndpointOutcome {
                    samples: Ok(samples),
                    elapsed,
                }) => {
                    if state.status == EndpointStatus::Offline {
                        info!(endpoint = %server, "Endpoint recovered");
                    }
                    state.record_success();
                    result.samples.extend(samples);
                    elapsed
                }
                Some(EndpointOutcome {
                    samples: Err(e),
                    elapsed,
                }) => {
                    state.record_failure(e.to_string());
                    warn!(
                        endpoint = %server,
                        error = %e,
                        error_type = %e.error_type(),
                        consecutive_failures = state.consecutive_failures,
                        "Endpoint scrape failed"
                    );
                    elapsed
                }
                None => {
                    state.record_failure("scrape deadline exceeded");
                    warn!(
                        endpoint = %server,
                        consecutive_failures = state.consecutive_failures,
                        "Endpoint scrape did not finish"
                    );
                    started.elapsed()
                }
            };

            if state.status != EndpointStatus::Online {
                result.failed += 1;
            }
            result.samples.push(self.sample(&self.up, server, state.status.as_up_value()));
            result
                .samples
                .push(self.sample(&self.duration, server, elapsed.as_secs_f64()));
        }
        drop(liveness);

        {
            let mut stats = self.stats.write();
            stats.scrapes += 1;
            stats.endpoint_failures += result.failed as u64;
            if deadline_exceeded {
                stats.deadlines_exceeded += 1;
            }
        }

        debug!(
            endpoints = self.endpoints.len(),
            failed = result.failed,
            samples = result.samples.len(),
            elapsed = ?started.elapsed(),
            "Scrape complete"
        );
        result
    }

    fn sample(&self, family: &Arc<MetricFamily>, server: &str, value: f64) -> MetricSample {
        MetricSample {
            family: family.clone(),
            labels: vec![server.to_string()],
            value,
        }
    }

    /// Scrape and render, reusing a recent page when configured to.
    pub async fn render(&self) -> String {
        let mut page = self.page.lock().await;

        if let Some((rendered_at, body)) = page.as_ref()
            && !self.settings.min_interval.is_zero()
            && rendered_at.elapsed() < self.settings.min_interval
        {
            debug!("Serving cached metrics page");
            return body.clone();
        }

        let result = self.scrape().await;
        let body = self.render_samples(&result.samples);
        *page = Some((Instant::now(), body.clone()));
        body
    }

    /// Render samples in Prometheus exposition format.
    ///
    /// Families are written in registry order, sorted by name; samples keep
    /// their scrape order.
    pub fn render_samples(&self, samples: &[MetricSample]) -> String {
        let mut output = Vec::with_capacity(samples.len() * 100);

        let mut by_family: HashMap<&str, Vec<&MetricSample>> = HashMap::new();
        for sample in samples {
            by_family.entry(&sample.family.name).or_default().push(sample);
        }

        for family in self.mapper.registry().families() {
            let Some(series) = by_family.get(family.name.as_str()) else {
                continue;
            };
            let name = format!("{}_{}", self.prefix, family.name);
            write_header(&mut output, &name, &family.help, family.kind.as_str());

            for sample in series {
                let labels: Vec<(&str, &str)> = family
                    .labels
                    .iter()
                    .map(String::as_str)
                    .zip(sample.labels.iter().map(String::as_str))
                    .collect();
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    format_labels(&labels),
                    format_value(sample.value)
                )
                .ok();
            }
        }

        self.render_diagnostics(&mut output);

        String::from_utf8(output).unwrap_or_default()
    }

    fn render_diagnostics(&self, output: &mut Vec<u8>) {
        let prefix = &self.prefix;
        let stats = self.stats.read().clone();
        let diagnostics = self.mapper.diagnostics();

        writeln!(output).ok();
        for (name, help, kind, value) in [
            ("scrapes_total", "Scrapes performed", "counter", stats.scrapes),
            (
                "endpoint_failures_total",
                "Endpoint scrapes that failed",
                "counter",
                stats.endpoint_failures,
            ),
            (
                "deadlines_exceeded_total",
                "Scrapes cut short by the deadline",
                "counter",
                stats.deadlines_exceeded,
            ),
            (
                "unmapped_statistics_total",
                "Statistics without a metric mapping",
                "counter",
                diagnostics.unmapped_total,
            ),
            (
                "unmapped_untracked_total",
                "Unmapped statistics not listed individually",
                "counter",
                diagnostics.unmapped_untracked_total,
            ),
            (
                "conflicts_total",
                "Samples overwritten by a statistic with identical labels",
                "counter",
                diagnostics.conflicts_total,
            ),
            (
                "non_finite_total",
                "Statistics dropped for a non-finite value",
                "counter",
                diagnostics.non_finite_total,
            ),
        ] {
            let name = format!("{prefix}_exporter_{name}");
            write_header(output, &name, help, kind);
            writeln!(output, "{} {}", name, value).ok();
        }

        if !diagnostics.unmapped_keys.is_empty() {
            let name = format!("{prefix}_exporter_unmapped_key");
            write_header(output, &name, "Statistic keys without a metric mapping", "gauge");
            for (module, key) in &diagnostics.unmapped_keys {
                let labels = [("module", module.as_str()), ("key", key.as_str())];
                writeln!(output, "{}{} 1", name, format_labels(&labels)).ok();
            }
        }
    }
}

async fn scrape_endpoint<C: ControlChannel>(
    endpoint: &KeaEndpoint<C>,
    mapper: &StatsMapper,
    reload_interval: Duration,
) -> Result<Vec<MetricSample>, ControlError> {
    let snapshot = endpoint.refresh(reload_interval).await?;
    let modules = endpoint.statistics(&snapshot.modules).await?;

    let mut samples = Vec::new();
    for module in &modules {
        samples.extend(mapper.map(
            endpoint.identity(),
            module.module,
            &module.stats,
            snapshot.subnets.for_module(module.module),
        ));
    }
    Ok(samples)
}

/// Create a shareable collector handle.
pub type SharedCollector<C> = Arc<ScrapeCollector<C>>;

fn write_header(output: &mut Vec<u8>, name: &str, help: &str, kind: &str) {
    writeln!(output, "# HELP {} {}", name, escape_help(help)).ok();
    writeln!(output, "# TYPE {} {}", name, kind).ok();
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn test_format_labels() {
        assert_eq!(format_labels(&[]), "");
        assert_eq!(
            format_labels(&[("server", "/run/kea.sock"), ("key", "a\"b")]),
            "{server=\"/run/kea.sock\",key=\"a\\\"b\"}"
        );
    }
}
