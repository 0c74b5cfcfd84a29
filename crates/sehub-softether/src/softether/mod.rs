//! SoftEther module root – re-exports public API surface.

pub mod types;
pub mod exec;
pub mod broker;
pub mod parser;
pub mod inventory;
pub mod access;
pub mod service;

pub use types::*;
pub use broker::{BrokerSnapshot, CommandBroker};
pub use exec::{CommandRunner, VpnCmdRunner};
pub use inventory::{InventoryCache, InventoryKind, Snapshot};
pub use access::{AccessPolicyApplier, RuleSpec};
pub use service::{SoftEtherService, SoftEtherServiceState};
