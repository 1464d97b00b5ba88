//! Control-channel access to Kea DHCP and DDNS servers.
//!
//! This crate provides:
//! - [`ControlChannel`]: the command/response contract shared by transports
//! - [`HttpClient`] and [`SocketClient`]: the HTTP(S) and UNIX socket transports
//! - [`Discovery`]: which services an endpoint serves
//! - [`SubnetTables`]: subnet id and pool index to label resolution
//! - [`KeaEndpoint`]: per-endpoint state, published as one snapshot

pub mod channel;
pub mod client;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod socket;
pub mod subnets;
pub mod target;

pub use channel::{CommandRequest, CommandResponse, ControlChannel, decode_responses};
pub use client::ControlClient;
pub use discovery::Discovery;
pub use endpoint::{EndpointSnapshot, KeaEndpoint, ModuleStats};
pub use error::{ControlError, ProtocolError, Result, TransportError};
pub use http::{HttpClient, TlsIdentity};
pub use socket::SocketClient;
pub use subnets::{SubnetEntry, SubnetTable, SubnetTables, pd_pool_fallback};
pub use target::{Credentials, Endpoint, TransportKind};
