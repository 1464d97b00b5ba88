//! Mapping of Kea statistic keys to metric families.
//!
//! Kea reports statistics as a flat map of dotted keys:
//!
//! ```text
//! pkt4-ack-sent                               global
//! subnet[1].assigned-addresses                per subnet
//! subnet[1].pool[0].assigned-addresses        per address pool
//! subnet[1].pd-pool[0].assigned-pds           per prefix-delegation pool
//! key[example.com.].update-sent               per TSIG key (DDNS)
//! ```
//!
//! A key is split into its path, the path decides the [`Scope`], and the
//! last segment is looked up in the rule table for that module and scope.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kea_common::{Module, StatValue, split_key};
use kea_control::{SubnetTable, pd_pool_fallback};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::MappingError;
use crate::families::{FamilyRegistry, MetricFamily, MetricSample};

/// Most distinct unmapped keys remembered for diagnostics.
pub const MAX_TRACKED_UNMAPPED: usize = 256;

/// Where in the key hierarchy a statistic lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Subnet,
    Pool,
    PdPool,
    DdnsKey,
}

impl Scope {
    /// Labels whose values come from the key itself.
    fn provided_labels(&self) -> &'static [&'static str] {
        match self {
            Scope::Global => &["server"],
            Scope::Subnet | Scope::Pool | Scope::PdPool => {
                &["server", "subnet", "subnet_id", "pool"]
            }
            Scope::DdnsKey => &["server", "key"],
        }
    }

    /// Labels a family must carry to keep samples of this scope apart.
    fn required_labels(&self) -> &'static [&'static str] {
        match self {
            Scope::Global => &["server"],
            Scope::Subnet => &["server", "subnet_id"],
            Scope::Pool | Scope::PdPool => &["server", "subnet_id", "pool"],
            Scope::DdnsKey => &["server", "key"],
        }
    }
}

const SUBNET_SCOPES: &[Scope] = &[Scope::Subnet];
const POOL_SCOPES: &[Scope] = &[Scope::Subnet, Scope::Pool, Scope::PdPool];

const GLOBAL_LABELS: &[&str] = &["server"];
const OPERATION_LABELS: &[&str] = &["server", "operation"];
const SUBNET_LABELS: &[&str] = &["server", "subnet", "subnet_id"];
const POOL_LABELS: &[&str] = &["server", "subnet", "subnet_id", "pool"];
const CONTEXT_LABELS: &[&str] = &["server", "subnet", "subnet_id", "context"];
const LEASE_TYPE_LABELS: &[&str] = &["server", "subnet", "subnet_id", "type"];
const KEY_LABELS: &[&str] = &["server", "key"];

/// One statistic-to-family rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub module: Module,
    pub scopes: Vec<Scope>,
    pub stat: String,
    pub family: MetricFamily,
    /// Labels with a constant value for this statistic, e.g. `operation`.
    pub fixed: Vec<(String, String)>,
}

impl Rule {
    fn fixed_label(&self, name: &str) -> Option<&str> {
        self.fixed
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The static rule table plus the statistics deliberately left out.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    rules: Vec<Rule>,
    ignored: HashSet<(Module, Scope, String)>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. The table is checked when a [`StatsMapper`] is built.
    pub fn rule(
        &mut self,
        module: Module,
        scopes: &[Scope],
        stat: &str,
        family: &MetricFamily,
        fixed: &[(&str, &str)],
    ) -> &mut Self {
        self.rules.push(Rule {
            module,
            scopes: scopes.to_vec(),
            stat: stat.to_string(),
            family: family.clone(),
            fixed: fixed
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }

    /// Skip a statistic at the given scope without reporting it unmapped.
    pub fn ignore(&mut self, module: Module, scope: Scope, stats: &[&str]) -> &mut Self {
        for stat in stats {
            self.ignored.insert((module, scope, stat.to_string()));
        }
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    fn is_ignored(&self, module: Module, scope: Scope, stat: &str) -> bool {
        self.ignored.contains(&(module, scope, stat.to_string()))
    }

    /// The statistics catalogue of Kea DHCPv4, DHCPv6 and DHCP-DDNS.
    pub fn kea() -> Self {
        let mut table = Self::new();
        table.add_dhcp4().add_dhcp6().add_ddns();
        table
    }

    fn add_dhcp4(&mut self) -> &mut Self {
        let m = Module::Dhcp4;

        let sent = MetricFamily::counter(
            "dhcp4_packets_sent_total",
            "Packets sent",
            OPERATION_LABELS,
        );
        for (stat, op) in [
            ("pkt4-offer-sent", "offer"),
            ("pkt4-ack-sent", "ack"),
            ("pkt4-nak-sent", "nak"),
        ] {
            self.rule(m, &[Scope::Global], stat, &sent, &[("operation", op)]);
        }

        let received = MetricFamily::counter(
            "dhcp4_packets_received_total",
            "Packets received",
            OPERATION_LABELS,
        );
        for (stat, op) in [
            ("pkt4-receive-drop", "drop"),
            ("pkt4-parse-failed", "parse-failed"),
            ("pkt4-discover-received", "discover"),
            ("pkt4-offer-received", "offer"),
            ("pkt4-request-received", "request"),
            ("pkt4-ack-received", "ack"),
            ("pkt4-nak-received", "nak"),
            ("pkt4-release-received", "release"),
            ("pkt4-decline-received", "decline"),
            ("pkt4-inform-received", "inform"),
            ("pkt4-unknown-received", "unknown"),
        ] {
            self.rule(m, &[Scope::Global], stat, &received, &[("operation", op)]);
        }

        let alloc_fail = MetricFamily::counter(
            "dhcp4_allocations_failed_total",
            "Allocation failures",
            CONTEXT_LABELS,
        );
        for (stat, context) in [
            ("v4-allocation-fail-shared-network", "shared-network"),
            ("v4-allocation-fail-subnet", "subnet"),
            ("v4-allocation-fail-no-pools", "no-pools"),
            ("v4-allocation-fail-classes", "classes"),
        ] {
            self.rule(m, SUBNET_SCOPES, stat, &alloc_fail, &[("context", context)]);
        }

        for (stat, family) in [
            (
                "assigned-addresses",
                MetricFamily::gauge(
                    "dhcp4_addresses_assigned_total",
                    "Assigned addresses",
                    POOL_LABELS,
                ),
            ),
            (
                "total-addresses",
                MetricFamily::gauge(
                    "dhcp4_addresses_total",
                    "Size of the address pool",
                    POOL_LABELS,
                ),
            ),
            (
                "declined-addresses",
                MetricFamily::gauge(
                    "dhcp4_addresses_declined_total",
                    "Declined addresses",
                    POOL_LABELS,
                ),
            ),
            (
                "reclaimed-declined-addresses",
                MetricFamily::counter(
                    "dhcp4_addresses_declined_reclaimed_total",
                    "Declined addresses that were reclaimed",
                    POOL_LABELS,
                ),
            ),
            (
                "reclaimed-leases",
                MetricFamily::counter(
                    "dhcp4_addresses_reclaimed_total",
                    "Expired leases reclaimed",
                    POOL_LABELS,
                ),
            ),
            (
                "cumulative-assigned-addresses",
                MetricFamily::counter(
                    "dhcp4_addresses_assigned_cumulative_total",
                    "Addresses assigned since server start",
                    POOL_LABELS,
                ),
            ),
        ] {
            self.rule(m, POOL_SCOPES, stat, &family, &[]);
        }

        self.rule(
            m,
            SUBNET_SCOPES,
            "v4-reservation-conflicts",
            &MetricFamily::counter(
                "dhcp4_reservation_conflicts_total",
                "Reservation conflicts",
                SUBNET_LABELS,
            ),
            &[],
        );
        self.rule(
            m,
            SUBNET_SCOPES,
            "v4-lease-reuses",
            &MetricFamily::counter("dhcp4_leases_reused_total", "Leases reused", SUBNET_LABELS),
            &[],
        );

        // Aggregates of values reported in more detail elsewhere
        self.ignore(
            m,
            Scope::Global,
            &[
                "pkt4-sent",
                "pkt4-received",
                "v4-allocation-fail",
                "v4-allocation-fail-shared-network",
                "v4-allocation-fail-subnet",
                "v4-allocation-fail-no-pools",
                "v4-allocation-fail-classes",
                "assigned-addresses",
                "total-addresses",
                "declined-addresses",
                "reclaimed-declined-addresses",
                "reclaimed-leases",
                "cumulative-assigned-addresses",
                "v4-reservation-conflicts",
                "v4-lease-reuses",
            ],
        )
        .ignore(m, Scope::Subnet, &["v4-allocation-fail"])
    }

    fn add_dhcp6(&mut self) -> &mut Self {
        let m = Module::Dhcp6;

        let sent = MetricFamily::counter(
            "dhcp6_packets_sent_total",
            "Packets sent",
            OPERATION_LABELS,
        );
        for (stat, op) in [
            ("pkt6-advertise-sent", "advertise"),
            ("pkt6-reply-sent", "reply"),
        ] {
            self.rule(m, &[Scope::Global], stat, &sent, &[("operation", op)]);
        }

        let received = MetricFamily::counter(
            "dhcp6_packets_received_total",
            "Packets received",
            OPERATION_LABELS,
        );
        for (stat, op) in [
            ("pkt6-receive-drop", "drop"),
            ("pkt6-parse-failed", "parse-failed"),
            ("pkt6-solicit-received", "solicit"),
            ("pkt6-advertise-received", "advertise"),
            ("pkt6-request-received", "request"),
            ("pkt6-reply-received", "reply"),
            ("pkt6-renew-received", "renew"),
            ("pkt6-rebind-received", "rebind"),
            ("pkt6-release-received", "release"),
            ("pkt6-decline-received", "decline"),
            ("pkt6-infrequest-received", "infrequest"),
            ("pkt6-unknown-received", "unknown"),
        ] {
            self.rule(m, &[Scope::Global], stat, &received, &[("operation", op)]);
        }

        self.rule(
            m,
            &[Scope::Global],
            "pkt6-dhcpv4-response-sent",
            &MetricFamily::counter(
                "dhcp6_packets_sent_dhcp4_total",
                "DHCPv4-over-DHCPv6 packets sent",
                OPERATION_LABELS,
            ),
            &[("operation", "response")],
        );
        let received_dhcp4 = MetricFamily::counter(
            "dhcp6_packets_received_dhcp4_total",
            "DHCPv4-over-DHCPv6 packets received",
            OPERATION_LABELS,
        );
        for (stat, op) in [
            ("pkt6-dhcpv4-query-received", "query"),
            ("pkt6-dhcpv4-response-received", "response"),
        ] {
            self.rule(m, &[Scope::Global], stat, &received_dhcp4, &[("operation", op)]);
        }

        let alloc_fail = MetricFamily::counter(
            "dhcp6_allocations_failed_total",
            "Allocation failures",
            CONTEXT_LABELS,
        );
        for (stat, context) in [
            ("v6-allocation-fail-shared-network", "shared-network"),
            ("v6-allocation-fail-subnet", "subnet"),
            ("v6-allocation-fail-no-pools", "no-pools"),
            ("v6-allocation-fail-classes", "classes"),
        ] {
            self.rule(m, SUBNET_SCOPES, stat, &alloc_fail, &[("context", context)]);
        }

        for (stat, family) in [
            (
                "assigned-nas",
                MetricFamily::gauge(
                    "dhcp6_na_assigned_total",
                    "Assigned non-temporary addresses",
                    POOL_LABELS,
                ),
            ),
            (
                "total-nas",
                MetricFamily::gauge(
                    "dhcp6_na_total",
                    "Size of the non-temporary address pool",
                    POOL_LABELS,
                ),
            ),
            (
                "cumulative-assigned-nas",
                MetricFamily::counter(
                    "dhcp6_na_assigned_cumulative_total",
                    "Non-temporary addresses assigned since server start",
                    POOL_LABELS,
                ),
            ),
            (
                "assigned-pds",
                MetricFamily::gauge(
                    "dhcp6_pd_assigned_total",
                    "Assigned delegated prefixes",
                    POOL_LABELS,
                ),
            ),
            (
                "total-pds",
                MetricFamily::gauge(
                    "dhcp6_pd_total",
                    "Size of the delegated prefix pool",
                    POOL_LABELS,
                ),
            ),
            (
                "cumulative-assigned-pds",
                MetricFamily::counter(
                    "dhcp6_pd_assigned_cumulative_total",
                    "Prefixes delegated since server start",
                    POOL_LABELS,
                ),
            ),
            (
                "declined-addresses",
                MetricFamily::gauge(
                    "dhcp6_addresses_declined_total",
                    "Declined addresses",
                    POOL_LABELS,
                ),
            ),
            (
                "reclaimed-declined-addresses",
                MetricFamily::counter(
                    "dhcp6_addresses_declined_reclaimed_total",
                    "Declined addresses that were reclaimed",
                    POOL_LABELS,
                ),
            ),
            (
                "reclaimed-leases",
                MetricFamily::counter(
                    "dhcp6_addresses_reclaimed_total",
                    "Expired leases reclaimed",
                    POOL_LABELS,
                ),
            ),
        ] {
            self.rule(m, POOL_SCOPES, stat, &family, &[]);
        }

        self.rule(
            m,
            SUBNET_SCOPES,
            "v6-reservation-conflicts",
            &MetricFamily::counter(
                "dhcp6_reservation_conflicts_total",
                "Reservation conflicts",
                SUBNET_LABELS,
            ),
            &[],
        );
        let reused = MetricFamily::counter(
            "dhcp6_leases_reused_total",
            "Leases reused",
            LEASE_TYPE_LABELS,
        );
        self.rule(m, SUBNET_SCOPES, "v6-ia-na-lease-reuses", &reused, &[("type", "IA_NA")]);
        self.rule(m, SUBNET_SCOPES, "v6-ia-pd-lease-reuses", &reused, &[("type", "IA_PD")]);

        self.ignore(
            m,
            Scope::Global,
            &[
                "pkt6-sent",
                "pkt6-received",
                "v6-allocation-fail",
                "v6-allocation-fail-shared-network",
                "v6-allocation-fail-subnet",
                "v6-allocation-fail-no-pools",
                "v6-allocation-fail-classes",
                "assigned-nas",
                "total-nas",
                "cumulative-assigned-nas",
                "assigned-pds",
                "total-pds",
                "cumulative-assigned-pds",
                "declined-addresses",
                "reclaimed-declined-addresses",
                "reclaimed-leases",
                "v6-reservation-conflicts",
                "v6-ia-na-lease-reuses",
                "v6-ia-pd-lease-reuses",
            ],
        )
        .ignore(m, Scope::Subnet, &["v6-allocation-fail"])
    }

    fn add_ddns(&mut self) -> &mut Self {
        let m = Module::Ddns;

        for (stat, name, help) in [
            ("ncr-error", "ddns_ncr_error_total", "Name change requests that failed"),
            ("ncr-invalid", "ddns_ncr_invalid_total", "Invalid name change requests"),
            ("ncr-received", "ddns_ncr_received_total", "Name change requests received"),
            ("queue-mgr-queue-full", "ddns_queue_full_total", "Requests dropped on a full queue"),
        ] {
            let family = MetricFamily::counter(name, help, GLOBAL_LABELS);
            self.rule(m, &[Scope::Global], stat, &family, &[]);
        }

        for outcome in ["error", "sent", "signed", "success", "timeout", "unsigned"] {
            let stat = format!("update-{outcome}");
            self.rule(
                m,
                &[Scope::Global],
                &stat,
                &MetricFamily::counter(
                    format!("ddns_update_{outcome}_total"),
                    format!("DNS updates ({outcome})"),
                    GLOBAL_LABELS,
                ),
                &[],
            );
            self.rule(
                m,
                &[Scope::DdnsKey],
                &stat,
                &MetricFamily::counter(
                    format!("ddns_key_update_{outcome}_total"),
                    format!("DNS updates per TSIG key ({outcome})"),
                    KEY_LABELS,
                ),
                &[],
            );
        }
        self
    }
}

/// A statistic key resolved to its scope and identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Location<'a> {
    scope: Scope,
    stat: &'a str,
    subnet_id: &'a str,
    pool: &'a str,
    key: &'a str,
}

impl<'a> Location<'a> {
    fn parse(module: Module, key: &'a str) -> Option<Self> {
        let segments = split_key(key).ok()?;

        // Keys may carry the module name as their first segment
        let path = match segments.split_first() {
            Some((first, rest))
                if !rest.is_empty()
                    && first.index.is_none()
                    && Module::normalize(first.name) == Some(module) =>
            {
                rest
            }
            _ => &segments[..],
        };

        let (last, parents) = path.split_last()?;
        if last.index.is_some() {
            return None;
        }

        let mut location = Location {
            scope: Scope::Global,
            stat: last.name,
            subnet_id: "",
            pool: "",
            key: "",
        };

        match parents {
            [] => {}
            [subnet] if subnet.name == "subnet" => {
                location.scope = Scope::Subnet;
                location.subnet_id = subnet.index?;
            }
            [subnet, pool]
                if subnet.name == "subnet" && (pool.name == "pool" || pool.name == "pd-pool") =>
            {
                location.scope = if pool.name == "pool" {
                    Scope::Pool
                } else {
                    Scope::PdPool
                };
                location.subnet_id = subnet.index?;
                location.pool = pool.index?;
            }
            [tsig] if tsig.name == "key" && module == Module::Ddns => {
                location.scope = Scope::DdnsKey;
                location.key = tsig.index?;
            }
            _ => return None,
        }

        Some(location)
    }

    fn label(&self, name: &str, server: &str, subnets: Option<&SubnetTable>) -> String {
        match name {
            "server" => server.to_string(),
            "subnet" => match subnets {
                Some(table) => table.subnet_label(self.subnet_id),
                None => self.subnet_id.to_string(),
            },
            "subnet_id" => self.subnet_id.to_string(),
            "pool" => match (self.scope, subnets) {
                (Scope::Pool, Some(table)) => table.pool_label(self.subnet_id, self.pool),
                (Scope::PdPool, Some(table)) => table.pd_pool_label(self.subnet_id, self.pool),
                (Scope::PdPool, None) => pd_pool_fallback(self.pool),
                _ => self.pool.to_string(),
            },
            "key" => self.key.to_string(),
            _ => String::new(),
        }
    }
}

/// Snapshot of mapping diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticsSnapshot {
    /// Distinct unmapped keys seen so far, at most [`MAX_TRACKED_UNMAPPED`].
    pub unmapped_keys: Vec<(Module, String)>,
    /// Unmapped statistics encountered, counting repeats.
    pub unmapped_total: u64,
    /// Unmapped statistics not remembered because the set was full.
    pub unmapped_untracked_total: u64,
    /// Samples overwritten by a later key with identical labels.
    pub conflicts_total: u64,
    /// Samples dropped for a NaN or infinite value.
    pub non_finite_total: u64,
}

/// Bounded record of keys the mapper could not handle.
#[derive(Default)]
pub struct Diagnostics {
    unmapped: Mutex<BTreeSet<(Module, String)>>,
    unmapped_total: AtomicU64,
    unmapped_untracked: AtomicU64,
    conflicts: AtomicU64,
    non_finite: AtomicU64,
}

impl Diagnostics {
    fn record(&self, module: Module, error: &MappingError) {
        match error {
            MappingError::UnknownKey(key) => self.record_unmapped(module, key),
            MappingError::NonFiniteValue { key, value } => {
                self.non_finite.fetch_add(1, Ordering::Relaxed);
                debug!(module = %module, key = %key, value, "Dropping non-finite statistic");
            }
            other => error!(module = %module, error = %other, "Mapping failed"),
        }
    }

    fn record_unmapped(&self, module: Module, key: &str) {
        self.unmapped_total.fetch_add(1, Ordering::Relaxed);

        let mut unmapped = self.unmapped.lock();
        let entry = (module, key.to_string());
        if unmapped.contains(&entry) {
            return;
        }
        if unmapped.len() >= MAX_TRACKED_UNMAPPED {
            self.unmapped_untracked.fetch_add(1, Ordering::Relaxed);
            return;
        }
        warn!(module = %module, key = %key, "Unmapped statistic");
        unmapped.insert(entry);
    }

    fn record_conflict(&self, family: &str, key: &str) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        debug!(family = %family, key = %key, "Statistic overwrote a sample with identical labels");
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            unmapped_keys: self.unmapped.lock().iter().cloned().collect(),
            unmapped_total: self.unmapped_total.load(Ordering::Relaxed),
            unmapped_untracked_total: self.unmapped_untracked.load(Ordering::Relaxed),
            conflicts_total: self.conflicts.load(Ordering::Relaxed),
            non_finite_total: self.non_finite.load(Ordering::Relaxed),
        }
    }
}

/// Turns raw statistics into metric samples.
pub struct StatsMapper {
    table: MappingTable,
    index: HashMap<(Module, Scope, String), usize>,
    registry: Arc<FamilyRegistry>,
    exclude: Vec<glob::Pattern>,
    diagnostics: Diagnostics,
}

impl StatsMapper {
    /// Validate the table and build the lookup index.
    ///
    /// Fails on a family defined twice with different schemas, on two rules
    /// claiming the same statistic, and on rules whose labels the scope
    /// cannot fill.
    pub fn new(table: MappingTable, registry: Arc<FamilyRegistry>) -> Result<Self, MappingError> {
        let scratch = FamilyRegistry::new();
        let mut index = HashMap::new();

        for (position, rule) in table.rules.iter().enumerate() {
            scratch.get_or_create(&rule.family)?;
            validate_rule(rule)?;

            for scope in &rule.scopes {
                if index.insert((rule.module, *scope, rule.stat.clone()), position).is_some() {
                    return Err(MappingError::InvalidRule {
                        stat: rule.stat.clone(),
                        reason: format!("mapped twice for {} at {:?} scope", rule.module, scope),
                    });
                }
            }
        }

        debug!(rules = table.rules.len(), families = scratch.len(), "Built mapping table");

        Ok(Self {
            table,
            index,
            registry,
            exclude: Vec::new(),
            diagnostics: Diagnostics::default(),
        })
    }

    /// Skip statistic keys matching any of the patterns.
    pub fn with_exclusions(mut self, patterns: Vec<glob::Pattern>) -> Self {
        self.exclude = patterns;
        self
    }

    pub fn registry(&self) -> &Arc<FamilyRegistry> {
        &self.registry
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Map the statistics of one module of one endpoint.
    ///
    /// Samples come out in key order. A key producing the same family and
    /// label values as an earlier key overwrites it.
    pub fn map(
        &self,
        server: &str,
        module: Module,
        stats: &[StatValue],
        subnets: Option<&SubnetTable>,
    ) -> Vec<MetricSample> {
        let mut samples: Vec<MetricSample> = Vec::with_capacity(stats.len());
        let mut seen: HashMap<(String, Vec<String>), usize> = HashMap::new();

        for stat in stats {
            if self.exclude.iter().any(|p| p.matches(&stat.key)) {
                continue;
            }

            let sample = match self.map_stat(server, module, stat, subnets) {
                Ok(Some(sample)) => sample,
                Ok(None) => continue,
                Err(e) => {
                    self.diagnostics.record(module, &e);
                    continue;
                }
            };

            let identity = (sample.family.name.clone(), sample.labels.clone());
            match seen.get(&identity) {
                Some(&existing) => {
                    self.diagnostics.record_conflict(&sample.family.name, &stat.key);
                    samples[existing].value = sample.value;
                }
                None => {
                    seen.insert(identity, samples.len());
                    samples.push(sample);
                }
            }
        }

        samples
    }

    fn map_stat(
        &self,
        server: &str,
        module: Module,
        stat: &StatValue,
        subnets: Option<&SubnetTable>,
    ) -> Result<Option<MetricSample>, MappingError> {
        let unknown = || MappingError::UnknownKey(stat.key.clone());

        let location = Location::parse(module, &stat.key).ok_or_else(unknown)?;
        if self.table.is_ignored(module, location.scope, location.stat) {
            return Ok(None);
        }

        let position = self
            .index
            .get(&(module, location.scope, location.stat.to_string()))
            .ok_or_else(unknown)?;
        let rule = &self.table.rules[*position];

        if !stat.value.is_finite() {
            return Err(MappingError::NonFiniteValue {
                key: stat.key.clone(),
                value: stat.value,
            });
        }

        let family = self.registry.get_or_create(&rule.family)?;
        let labels = family
            .labels
            .iter()
            .map(|name| match rule.fixed_label(name) {
                Some(value) => value.to_string(),
                None => location.label(name, server, subnets),
            })
            .collect();

        Ok(Some(MetricSample {
            family,
            labels,
            value: stat.value,
        }))
    }
}

fn validate_rule(rule: &Rule) -> Result<(), MappingError> {
    let invalid = |reason: String| MappingError::InvalidRule {
        stat: rule.stat.clone(),
        reason,
    };

    if rule.scopes.is_empty() {
        return Err(invalid("no scope".to_string()));
    }

    for (name, _) in &rule.fixed {
        if !rule.family.labels.contains(name) {
            return Err(invalid(format!(
                "fixed label '{name}' is not a label of {}",
                rule.family.name
            )));
        }
    }

    for scope in &rule.scopes {
        for label in &rule.family.labels {
            let provided = scope.provided_labels().contains(&label.as_str())
                || rule.fixed_label(label).is_some();
            if !provided {
                return Err(invalid(format!("label '{label}' has no value at {scope:?} scope")));
            }
        }
        for required in scope.required_labels() {
            if !rule.family.labels.iter().any(|l| l == required) {
                return Err(invalid(format!(
                    "{} lacks label '{required}' needed at {scope:?} scope",
                    rule.family.name
                )));
            }
        }
    }

    Ok(())
}
