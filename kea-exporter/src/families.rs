//! Metric family registry.
//!
//! Families are created on first use and never removed, so a family's name,
//! type and label schema stay stable for the life of the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::MappingError;

/// Prometheus metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// A named, typed group of samples sharing one label schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFamily {
    /// Family name without the exposition prefix.
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    /// Label names in exposition order.
    pub labels: Vec<String>,
}

impl MetricFamily {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        kind: MetricKind,
        labels: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn counter(name: impl Into<String>, help: impl Into<String>, labels: &[&str]) -> Self {
        Self::new(name, help, MetricKind::Counter, labels)
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>, labels: &[&str]) -> Self {
        Self::new(name, help, MetricKind::Gauge, labels)
    }

    fn same_schema(&self, other: &MetricFamily) -> bool {
        self.kind == other.kind && self.labels == other.labels
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{{{}}}", self.kind.as_str(), self.name, self.labels.join(","))
    }
}

/// One value of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub family: Arc<MetricFamily>,
    /// Label values, positionally matching `family.labels`.
    pub labels: Vec<String>,
    pub value: f64,
}

impl MetricSample {
    /// Value of the named label, if the family has it.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.family
            .labels
            .iter()
            .position(|l| l == name)
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }
}

/// Process-wide create-if-absent table of metric families.
#[derive(Default)]
pub struct FamilyRegistry {
    families: RwLock<HashMap<String, Arc<MetricFamily>>>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the registered family, creating it if absent.
    ///
    /// Fails if a family with the same name but a different type or label
    /// schema already exists.
    pub fn get_or_create(&self, family: &MetricFamily) -> Result<Arc<MetricFamily>, MappingError> {
        if let Some(existing) = self.families.read().get(&family.name) {
            return check_schema(existing, family);
        }

        let mut families = self.families.write();
        let entry = families
            .entry(family.name.clone())
            .or_insert_with(|| Arc::new(family.clone()));
        check_schema(entry, family)
    }

    pub fn get(&self, name: &str) -> Option<Arc<MetricFamily>> {
        self.families.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.families.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.read().is_empty()
    }

    /// All registered families sorted by name.
    pub fn families(&self) -> Vec<Arc<MetricFamily>> {
        let mut families: Vec<_> = self.families.read().values().cloned().collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));
        families
    }
}

fn check_schema(
    existing: &Arc<MetricFamily>,
    requested: &MetricFamily,
) -> Result<Arc<MetricFamily>, MappingError> {
    if existing.same_schema(requested) {
        Ok(existing.clone())
    } else {
        Err(MappingError::DuplicateFamilyDefinition {
            name: requested.name.clone(),
            existing: existing.to_string(),
            requested: requested.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_reuses_family() {
        let registry = FamilyRegistry::new();
        let family = MetricFamily::counter(
            "dhcp4_packets_sent_total",
            "Packets sent",
            &["server", "operation"],
        );

        let first = registry.get_or_create(&family).unwrap();
        let second = registry.get_or_create(&family).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_help_text_does_not_change_schema() {
        let registry = FamilyRegistry::new();
        registry
            .get_or_create(&MetricFamily::gauge("up", "one", &["server"]))
            .unwrap();
        let family = registry
            .get_or_create(&MetricFamily::gauge("up", "two", &["server"]))
            .unwrap();
        assert_eq!(family.help, "one");
    }

    #[test]
    fn test_conflicting_schema_is_rejected() {
        let registry = FamilyRegistry::new();
        registry
            .get_or_create(&MetricFamily::gauge("x_total", "x", &["server"]))
            .unwrap();

        let labels =
            registry.get_or_create(&MetricFamily::gauge("x_total", "x", &["server", "subnet"]));
        assert!(matches!(labels, Err(MappingError::DuplicateFamilyDefinition { .. })));

        let kind = registry.get_or_create(&MetricFamily::counter("x_total", "x", &["server"]));
        assert!(matches!(kind, Err(MappingError::DuplicateFamilyDefinition { .. })));
    }

    #[test]
    fn test_families_sorted() {
        let registry = FamilyRegistry::new();
        for name in ["b", "c", "a"] {
            registry.get_or_create(&MetricFamily::gauge(name, name, &[])).unwrap();
        }
        let names: Vec<_> = registry.families().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_concurrent_first_use() {
        let registry = Arc::new(FamilyRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .get_or_create(&MetricFamily::gauge("shared", "s", &["server"]))
                        .unwrap()
                })
            })
            .collect();

        let families: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(families.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sample_label_lookup() {
        let family = Arc::new(MetricFamily::gauge("f", "f", &["server", "subnet"]));
        let sample = MetricSample {
            family,
            labels: vec!["s1".into(), "192.0.2.0/24".into()],
            value: 1.0,
        };
        assert_eq!(sample.label("subnet"), Some("192.0.2.0/24"));
        assert_eq!(sample.label("pool"), None);
    }
}
