//! Subnet and pool label resolution.
//!
//! Kea statistics refer to subnets by numeric id and to pools by position.
//! [`SubnetTables`] maps those to the configured prefix and pool ranges, one
//! table per DHCP module. Tables are immutable once built; a reload builds a
//! fresh set.

use std::collections::HashMap;

use kea_common::Module;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::channel::{CommandRequest, CommandResponse, ControlChannel};
use crate::error::ControlError;

/// A configured subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetEntry {
    pub id: u64,
    /// Subnet prefix, e.g. `192.0.2.0/24`.
    pub prefix: String,
    /// Address pool labels in configuration order.
    pub pools: Vec<String>,
    /// Prefix-delegation pool labels in configuration order.
    pub pd_pools: Vec<String>,
}

/// Subnets of one module, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SubnetTable {
    entries: HashMap<u64, SubnetEntry>,
}

impl SubnetTable {
    pub fn insert(&mut self, entry: SubnetEntry) {
        self.entries.insert(entry.id, entry);
    }

    pub fn get(&self, id: u64) -> Option<&SubnetEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label for a subnet id as it appears in a statistic key.
    ///
    /// Falls back to the raw id when the subnet is unknown.
    pub fn subnet_label(&self, id: &str) -> String {
        id.parse::<u64>()
            .ok()
            .and_then(|id| self.get(id))
            .map(|entry| entry.prefix.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Label for an address pool, falling back to the index.
    pub fn pool_label(&self, subnet_id: &str, index: &str) -> String {
        self.pool_entry(subnet_id, index, |entry| &entry.pools)
            .unwrap_or_else(|| index.to_string())
    }

    /// Label for a prefix-delegation pool, falling back to `pd-<index>`.
    ///
    /// The fallback differs from the address pool one so that `pool[N]` and
    /// `pd-pool[N]` of the same subnet never share a label value.
    pub fn pd_pool_label(&self, subnet_id: &str, index: &str) -> String {
        self.pool_entry(subnet_id, index, |entry| &entry.pd_pools)
            .unwrap_or_else(|| pd_pool_fallback(index))
    }

    fn pool_entry(
        &self,
        subnet_id: &str,
        index: &str,
        pools: impl Fn(&SubnetEntry) -> &Vec<String>,
    ) -> Option<String> {
        let entry = self.get(subnet_id.parse().ok()?)?;
        pools(entry).get(index.parse::<usize>().ok()?).cloned()
    }
}

/// Label of a prefix-delegation pool that is not in any table.
pub fn pd_pool_fallback(index: &str) -> String {
    format!("pd-{index}")
}

/// Subnet tables for every DHCP module of one endpoint.
///
/// Subnet ids are scoped per module: `dhcp4` id 1 and `dhcp6` id 1 are
/// different subnets.
#[derive(Debug, Clone, Default)]
pub struct SubnetTables {
    pub dhcp4: SubnetTable,
    pub dhcp6: SubnetTable,
}

impl SubnetTables {
    /// The table for a module; `None` for modules without subnets.
    pub fn for_module(&self, module: Module) -> Option<&SubnetTable> {
        match module {
            Module::Dhcp4 => Some(&self.dhcp4),
            Module::Dhcp6 => Some(&self.dhcp6),
            Module::Ddns => None,
        }
    }

    /// Build tables from `config-get` responses.
    ///
    /// Each response is searched for `Dhcp4` and `Dhcp6` sections; subnets
    /// are read from the top-level list and from every shared network.
    pub fn from_config(responses: &[CommandResponse]) -> Self {
        let mut tables = Self::default();
        for response in responses {
            let Ok(arguments) = response.arguments_object() else {
                continue;
            };
            tables.absorb(arguments);
        }
        tables
    }

    /// Add the subnets found in one configuration object.
    pub fn absorb(&mut self, config: &Map<String, Value>) {
        if let Some(Value::Object(dhcp4)) = config.get(Module::Dhcp4.config_key()) {
            collect_subnets(dhcp4, "subnet4", &mut self.dhcp4);
        }
        if let Some(Value::Object(dhcp6)) = config.get(Module::Dhcp6.config_key()) {
            collect_subnets(dhcp6, "subnet6", &mut self.dhcp6);
        }
    }
}

fn collect_subnets(daemon: &Map<String, Value>, list_key: &str, table: &mut SubnetTable) {
    let shared = daemon
        .get("shared-networks")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|network| network.get(list_key));

    for list in daemon.get(list_key).into_iter().chain(shared) {
        let Some(subnets) = list.as_array() else {
            continue;
        };
        for subnet in subnets {
            match parse_subnet(subnet) {
                Some(entry) => table.insert(entry),
                None => warn!(list = list_key, "Skipping subnet without id or prefix"),
            }
        }
    }
}

fn parse_subnet(subnet: &Value) -> Option<SubnetEntry> {
    let id = subnet.get("id")?.as_u64()?;
    let prefix = subnet.get("subnet")?.as_str()?.to_string();

    let pools = subnet
        .get("pools")
        .and_then(Value::as_array)
        .map(|pools| {
            pools
                .iter()
                .enumerate()
                .map(|(i, pool)| {
                    pool.get("pool")
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_else(|| i.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    let pd_pools = subnet
        .get("pd-pools")
        .and_then(Value::as_array)
        .map(|pools| {
            pools
                .iter()
                .enumerate()
                .map(|(i, pool)| {
                    let prefix = pool.get("prefix").and_then(Value::as_str);
                    let len = pool.get("prefix-len").and_then(Value::as_u64);
                    match (prefix, len) {
                        (Some(prefix), Some(len)) => format!("{prefix}/{len}"),
                        _ => pd_pool_fallback(&i.to_string()),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Some(SubnetEntry {
        id,
        prefix,
        pools,
        pd_pools,
    })
}

impl SubnetTables {
    /// Fetch the configuration of the given modules and build fresh tables.
    pub async fn fetch<C: ControlChannel + ?Sized>(
        client: &C,
        modules: &[Module],
    ) -> Result<Self, ControlError> {
        let dhcp: Vec<Module> = modules.iter().copied().filter(Module::has_subnets).collect();
        if dhcp.is_empty() {
            return Ok(Self::default());
        }

        let request = CommandRequest::new("config-get").with_services(&dhcp);
        let responses = client.send_command(&request).await?;
        let tables = Self::from_config(&responses);

        debug!(
            endpoint = %client.identity(),
            dhcp4_subnets = tables.dhcp4.len(),
            dhcp6_subnets = tables.dhcp6.len(),
            "Built subnet tables"
        );
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(arguments: Value) -> CommandResponse {
        CommandResponse {
            result: 0,
            text: None,
            arguments: Some(arguments),
        }
    }

    fn sample_config() -> Value {
        json!({
            "Dhcp4": {
                "subnet4": [
                    {
                        "id": 1,
                        "subnet": "192.0.2.0/24",
                        "pools": [{ "pool": "192.0.2.10 - 192.0.2.100" }, {}]
                    }
                ],
                "shared-networks": [
                    {
                        "name": "office",
                        "subnet4": [{ "id": 7, "subnet": "198.51.100.0/24" }]
                    }
                ]
            },
            "Dhcp6": {
                "subnet6": [
                    {
                        "id": 1,
                        "subnet": "2001:db8:1::/64",
                        "pools": [{ "pool": "2001:db8:1::100-2001:db8:1::1ff" }],
                        "pd-pools": [
                            { "prefix": "2001:db8:8::", "prefix-len": 56, "delegated-len": 64 }
                        ]
                    },
                    { "subnet": "2001:db8:2::/64" }
                ]
            }
        })
    }

    #[test]
    fn test_from_config() {
        let tables = SubnetTables::from_config(&[response(sample_config())]);

        assert_eq!(tables.dhcp4.len(), 2);
        assert_eq!(tables.dhcp4.get(7).unwrap().prefix, "198.51.100.0/24");
        assert_eq!(
            tables.dhcp4.get(1).unwrap().pools,
            vec!["192.0.2.10 - 192.0.2.100".to_string(), "1".to_string()]
        );

        // Entry without an id is skipped
        assert_eq!(tables.dhcp6.len(), 1);
        assert_eq!(tables.dhcp6.get(1).unwrap().pd_pools, vec!["2001:db8:8::/56"]);
    }

    #[test]
    fn test_ids_are_module_scoped() {
        let tables = SubnetTables::from_config(&[response(sample_config())]);
        assert_eq!(tables.dhcp4.subnet_label("1"), "192.0.2.0/24");
        assert_eq!(tables.dhcp6.subnet_label("1"), "2001:db8:1::/64");
        assert!(tables.for_module(Module::Ddns).is_none());
    }

    #[test]
    fn test_label_fallbacks() {
        let tables = SubnetTables::from_config(&[response(sample_config())]);
        let dhcp4 = &tables.dhcp4;

        assert_eq!(dhcp4.subnet_label("42"), "42");
        assert_eq!(dhcp4.subnet_label("abc"), "abc");
        assert_eq!(dhcp4.pool_label("1", "0"), "192.0.2.10 - 192.0.2.100");
        assert_eq!(dhcp4.pool_label("1", "5"), "5");
        assert_eq!(dhcp4.pool_label("42", "0"), "0");
        assert_eq!(tables.dhcp6.pd_pool_label("1", "0"), "2001:db8:8::/56");
        assert_eq!(tables.dhcp6.pd_pool_label("1", "1"), "pd-1");
        assert_eq!(tables.dhcp6.pd_pool_label("42", "0"), "pd-0");
    }

}
