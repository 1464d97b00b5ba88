//! Discovery of the Kea services behind an endpoint.

use std::collections::BTreeSet;

use kea_common::Module;
use serde_json::{Map, Value};
use tracing::debug;

use crate::channel::{CommandRequest, CommandResponse, ControlChannel};
use crate::error::{ControlError, ProtocolError};
use crate::subnets::SubnetTables;

const CONTROL_AGENT_KEY: &str = "Control-agent";

/// Outcome of one discovery round.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Modules found, sorted and deduplicated.
    pub modules: Vec<Module>,
    /// Subnet tables, when the discovered configuration already carried the
    /// daemon sections.
    pub subnets: Option<SubnetTables>,
}

impl Discovery {
    /// Interpret the responses of an unscoped `config-get`.
    ///
    /// A Control Agent configuration lists its daemons under
    /// `control-sockets`. A daemon configuration names itself through its
    /// top-level key.
    pub fn from_config(responses: &[CommandResponse]) -> Result<Self, ProtocolError> {
        let mut modules = BTreeSet::new();
        let mut subnets: Option<SubnetTables> = None;

        for response in responses {
            let config = response.arguments_object()?;

            if let Some(agent) = config.get(CONTROL_AGENT_KEY) {
                modules.extend(control_socket_modules(agent));
                continue;
            }

            modules.extend(config.keys().filter_map(|key| Module::normalize(key)));

            if has_daemon_section(config) {
                subnets.get_or_insert_with(SubnetTables::default).absorb(config);
            }
        }

        if modules.is_empty() {
            return Err(ProtocolError::UnexpectedShape(
                "configuration names no supported Kea service".to_string(),
            ));
        }

        Ok(Self {
            modules: modules.into_iter().collect(),
            subnets,
        })
    }
}

fn control_socket_modules(agent: &Value) -> impl Iterator<Item = Module> + '_ {
    agent
        .get("control-sockets")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|sockets| sockets.keys())
        .filter_map(|name| Module::normalize(name))
}

fn has_daemon_section(config: &Map<String, Value>) -> bool {
    config
        .keys()
        .filter_map(|key| Module::normalize(key))
        .any(|module| module.has_subnets())
}

impl Discovery {
    /// Query the endpoint with an unscoped `config-get` and interpret it.
    pub async fn fetch<C: ControlChannel + ?Sized>(client: &C) -> Result<Self, ControlError> {
        let responses = client
            .send_command(&CommandRequest::new("config-get"))
            .await?;
        let discovery = Self::from_config(&responses)?;

        debug!(
            endpoint = %client.identity(),
            modules = ?discovery.modules,
            "Fetched Kea service list"
        );
        Ok(discovery)
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

    #[test]
    fn test_control_agent_sockets() {
        let config = json!({
            "Control-agent": {
                "http-host": "127.0.0.1",
                "control-sockets": {
                    "dhcp4": { "socket-type": "unix", "socket-name": "/run/kea/4" },
                    "d2": { "socket-type": "unix", "socket-name": "/run/kea/d2" }
                }
            }
        });

        let discovery = Discovery::from_config(&[response(config)]).unwrap();
        assert_eq!(discovery.modules, vec![Module::Dhcp4, Module::Ddns]);
        assert!(discovery.subnets.is_none());
    }

    #[test]
    fn test_daemon_config_carries_subnets() {
        let config = json!({
            "Dhcp6": {
                "subnet6": [{ "id": 3, "subnet": "2001:db8::/64" }]
            },
            "hash": "abc"
        });

        let discovery = Discovery::from_config(&[response(config)]).unwrap();
        assert_eq!(discovery.modules, vec![Module::Dhcp6]);
        let subnets = discovery.subnets.unwrap();
        assert_eq!(subnets.dhcp6.subnet_label("3"), "2001:db8::/64");
    }

    #[test]
    fn test_ddns_daemon_names() {
        for key in ["DhcpDdns", "D2", "ddns"] {
            let mut config = Map::new();
            config.insert(key.to_string(), json!({}));
            let discovery = Discovery::from_config(&[response(Value::Object(config))]).unwrap();
            assert_eq!(discovery.modules, vec![Module::Ddns]);
            assert!(discovery.subnets.is_none());
        }
    }

    #[test]
    fn test_no_supported_service() {
        let result = Discovery::from_config(&[response(json!({ "Netconf": {} }))]);
        assert!(matches!(result, Err(ProtocolError::UnexpectedShape(_))));
    }
}
