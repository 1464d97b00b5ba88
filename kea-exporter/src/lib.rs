//! Prometheus exporter for Kea DHCP and DDNS statistics.
//!
//! Each request to the metrics endpoint scrapes every configured Kea
//! endpoint concurrently, maps the raw statistics to metric families and
//! renders them in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Kea endpoints  │────>│    Collector    │────>│   HTTP Server   │
//! │ (HTTP / socket) │     │    (mapping)    │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! kea-exporter http://kea-ctrl-agent:8000 /run/kea/kea4-ctrl-socket
//! kea-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod error;
pub mod families;
pub mod http;
pub mod mapping;

pub use collector::{ScrapeCollector, ScrapeResult, ScrapeSettings, SharedCollector};
pub use config::ExporterConfig;
pub use error::MappingError;
pub use families::{FamilyRegistry, MetricFamily, MetricKind, MetricSample};
pub use http::HttpServer;
pub use mapping::{MappingTable, Scope, StatsMapper};
