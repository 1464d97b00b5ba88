//! Per-endpoint state: discovered modules, subnet tables and statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kea_common::{Module, StatValue, parse_statistics};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::channel::{CommandRequest, ControlChannel};
use crate::discovery::Discovery;
use crate::error::{ControlError, ProtocolError};
use crate::subnets::SubnetTables;

/// A consistent view of an endpoint's discovered state.
///
/// Modules and subnet tables always come from the same reload.
#[derive(Debug, Clone, Default)]
pub struct EndpointSnapshot {
    pub modules: Vec<Module>,
    pub subnets: SubnetTables,
}

/// Statistics returned by one module.
#[derive(Debug, Clone)]
pub struct ModuleStats {
    pub module: Module,
    pub stats: Vec<StatValue>,
}

/// A Kea endpoint with its discovered modules and subnets.
pub struct KeaEndpoint<C> {
    client: C,
    state: RwLock<Arc<EndpointSnapshot>>,
    last_reload: Mutex<Option<Instant>>,
    reload_lock: tokio::sync::Mutex<()>,
}

impl<C: ControlChannel> KeaEndpoint<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            state: RwLock::new(Arc::new(EndpointSnapshot::default())),
            last_reload: Mutex::new(None),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &str {
        self.client.identity()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Whether discovery has succeeded at least once.
    pub fn is_loaded(&self) -> bool {
        self.last_reload.lock().is_some()
    }

    /// The currently published state.
    pub fn snapshot(&self) -> Arc<EndpointSnapshot> {
        self.state.read().clone()
    }

    /// Rediscover modules and rebuild subnet tables.
    ///
    /// Concurrent reloads are serialized. The new state is published in one
    /// swap; on failure the previous state is left untouched.
    pub async fn reload(&self) -> Result<Arc<EndpointSnapshot>, ControlError> {
        let _guard = self.reload_lock.lock().await;

        self.client.connect().await?;
        let discovery = Discovery::fetch(&self.client).await?;
        let subnets = match discovery.subnets {
            Some(tables) => tables,
            None => SubnetTables::fetch(&self.client, &discovery.modules).await?,
        };

        let snapshot = Arc::new(EndpointSnapshot {
            modules: discovery.modules,
            subnets,
        });
        let previous = std::mem::replace(&mut *self.state.write(), snapshot.clone());
        *self.last_reload.lock() = Some(Instant::now());

        if previous.modules != snapshot.modules {
            info!(
                endpoint = %self.identity(),
                modules = ?snapshot.modules,
                "Discovered Kea services"
            );
        }
        debug!(
            endpoint = %self.identity(),
            dhcp4_subnets = snapshot.subnets.dhcp4.len(),
            dhcp6_subnets = snapshot.subnets.dhcp6.len(),
            "Endpoint reloaded"
        );
        Ok(snapshot)
    }

    /// Reload when the last successful reload is older than `interval`.
    ///
    /// A failed reload keeps serving the previous state if there is one.
    pub async fn refresh(&self, interval: Duration) -> Result<Arc<EndpointSnapshot>, ControlError> {
        let due = match *self.last_reload.lock() {
            None => true,
            Some(at) => at.elapsed() >= interval,
        };
        if !due {
            return Ok(self.snapshot());
        }

        match self.reload().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if self.is_loaded() => {
                warn!(
                    endpoint = %self.identity(),
                    error = %e,
                    "Reload failed, keeping previous configuration"
                );
                Ok(self.snapshot())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch all statistics of the given modules in one command.
    ///
    /// A module answering with a non-zero result is skipped; the call only
    /// fails when no module answered.
    pub async fn statistics(&self, modules: &[Module]) -> Result<Vec<ModuleStats>, ControlError> {
        if modules.is_empty() {
            return Ok(Vec::new());
        }

        let request = CommandRequest::new("statistic-get-all")
            .with_services(modules)
            .with_arguments(json!({}));
        let responses = self.client.exchange(&request).await?;

        if responses.len() != modules.len() {
            return Err(ProtocolError::UnexpectedShape(format!(
                "expected {} responses, got {}",
                modules.len(),
                responses.len()
            ))
            .into());
        }

        let mut result = Vec::with_capacity(modules.len());
        let mut last_error = None;
        for (module, response) in modules.iter().zip(&responses) {
            let arguments = match response.check().and_then(|()| response.arguments_object()) {
                Ok(arguments) => arguments,
                Err(e) => {
                    warn!(
                        endpoint = %self.identity(),
                        module = %module,
                        result = response.result,
                        text = response.text.as_deref().unwrap_or_default(),
                        "Skipping module without statistics"
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            let stats = parse_statistics(arguments);
            debug!(
                endpoint = %self.identity(),
                module = %module,
                count = stats.len(),
                "Fetched statistics"
            );
            result.push(ModuleStats {
                module: *module,
                stats,
            });
        }

        match last_error {
            Some(e) if result.is_empty() => Err(e.into()),
            _ => Ok(result),
        }
    }
}
