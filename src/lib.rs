//! tempgrant - timed capability grant scheduler.
//!
//! Grants a principal a capability (a role) for a bounded time window, then
//! either revokes it or atomically swaps it for a different, permanent
//! capability, without relying on the remote platform to signal expiry.
//!
//! The crate is the scheduler core only. The chat-platform gateway and the
//! command layer that originates grants are collaborators behind the
//! [`gateway::CapabilityGateway`] trait and the [`store::GrantStore`]
//! surface; the embedding application wires them up.
//!
//! Layout:
//! - [`store`] / [`db`] - persistent grant records (SQLite via SQLx) and the
//!   guarded creation surface all callers must go through
//! - [`protect`] - in-memory protection tracker closing the re-registration
//!   race after a swap
//! - [`sweep`] - the expiration and replacement passes over due records
//! - [`scheduler`] - the periodic driver with start/stop/status

pub mod config;
pub mod db;
pub mod gateway;
pub mod metrics;
pub mod protect;
pub mod scheduler;
pub mod store;
pub mod sweep;

pub use config::{Config, ConfigError, SweepConfig};
pub use db::{Database, DbError, ReplacementGrant, SimpleGrant};
pub use gateway::{Capability, CapabilityGateway, GatewayError, Principal, Scope};
pub use protect::{ProtectionEntry, ProtectionTracker};
pub use scheduler::{SchedulerStatus, SweepScheduler};
pub use store::{GrantStore, NewReplacementGrant, NewSimpleGrant, PrincipalGrants, StoreError};
pub use sweep::{SweepStats, Sweeper};
