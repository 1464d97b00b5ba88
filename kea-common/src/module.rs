//! Kea service modules and alias normalization.

use serde::{Deserialize, Serialize};

/// A Kea service that publishes statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Dhcp4,
    Dhcp6,
    Ddns,
}

impl Module {
    /// All modules in discovery order.
    pub const ALL: [Module; 3] = [Module::Dhcp4, Module::Dhcp6, Module::Ddns];

    /// Normalize a service name or configuration key to a module.
    ///
    /// Accepts `dhcp4`, `dhcp6`, `d2`, `ddns` and `dhcpddns` in any case.
    pub fn normalize(name: &str) -> Option<Module> {
        match name.to_ascii_lowercase().as_str() {
            "dhcp4" => Some(Module::Dhcp4),
            "dhcp6" => Some(Module::Dhcp6),
            "d2" | "ddns" | "dhcpddns" => Some(Module::Ddns),
            _ => None,
        }
    }

    /// Name used for labels and metric prefixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Dhcp4 => "dhcp4",
            Module::Dhcp6 => "dhcp6",
            Module::Ddns => "ddns",
        }
    }

    /// Service name sent in the `service` list of a control-channel request.
    pub fn service_name(&self) -> &'static str {
        match self {
            Module::Dhcp4 => "dhcp4",
            Module::Dhcp6 => "dhcp6",
            Module::Ddns => "d2",
        }
    }

    /// Top-level key of this module's configuration in a `config-get` response.
    pub fn config_key(&self) -> &'static str {
        match self {
            Module::Dhcp4 => "Dhcp4",
            Module::Dhcp6 => "Dhcp6",
            Module::Ddns => "DhcpDdns",
        }
    }

    /// Whether this module serves subnets.
    pub fn has_subnets(&self) -> bool {
        matches!(self, Module::Dhcp4 | Module::Dhcp6)
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(Module::normalize("dhcp4"), Some(Module::Dhcp4));
        assert_eq!(Module::normalize("Dhcp6"), Some(Module::Dhcp6));
        assert_eq!(Module::normalize("d2"), Some(Module::Ddns));
        assert_eq!(Module::normalize("D2"), Some(Module::Ddns));
        assert_eq!(Module::normalize("DhcpDdns"), Some(Module::Ddns));
        assert_eq!(Module::normalize("ddns"), Some(Module::Ddns));
        assert_eq!(Module::normalize("ca"), None);
        assert_eq!(Module::normalize(""), None);
    }

    #[test]
    fn test_service_name_round_trips_through_normalize() {
        for module in Module::ALL {
            assert_eq!(Module::normalize(module.service_name()), Some(module));
            assert_eq!(Module::normalize(module.config_key()), Some(module));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Module::Ddns.to_string(), "ddns");
        assert_eq!(Module::Ddns.service_name(), "d2");
    }
}
