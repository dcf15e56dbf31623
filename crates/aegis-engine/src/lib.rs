//! The aegis device-management policy engine.
//!
//! This crate is the stateful half of aegis: it tracks the registered
//! management admins per user, enforces the device-owner / profile-owner
//! singleton invariants, merges admin declarations into effective policy
//! through strictest-wins aggregation, manages scoped delegation, gates
//! device-wide audit logging behind cross-user affiliation, and persists
//! per-user snapshots with a journal-and-commit store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      PolicyEngine                        │
//! │                                                          │
//! │  caller op ──► lock ──► registry / ownership /           │
//! │                         delegation / provisioning        │
//! │                         mutations + precondition checks  │
//! │                │                                         │
//! │                └─► Effects (collected under the lock)    │
//! │   unlock ──► Effects dispatch: store commits, lifecycle  │
//! │              notifications, enforcement pushes           │
//! │                                                          │
//! │  reads ──► lock ──► PolicyAggregator (pure reduction     │
//! │                     over eligible admin records)         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything the OS does for the engine sits behind the traits in
//! [`platform`]; the engine never touches the system directly.

pub mod affiliation;
pub mod aggregator;
pub mod config;
pub mod delegation;
pub mod engine;
pub mod lock;
pub mod ownership;
pub mod platform;
pub mod registry;
pub mod snapshot;
pub mod store;

pub use affiliation::{AffiliationTracker, NetworkEvent, SecurityEvent};
pub use aggregator::PolicyAggregator;
pub use config::EngineConfig;
pub use engine::{PermittedListKind, PolicyEngine};
pub use lock::{PolicyGuard, PolicyLock};
pub use ownership::{CallerContext, DesignationContext, OwnerEntry, OwnershipError, OwnershipRecord};
pub use platform::{
    AdminDescriptor, AdminLifecycleEvent, CompletionHandle, EnforcementSink, LifecycleNotifier,
    ProfileInfo, UserDirectory,
};
pub use snapshot::{LoadOutcome, PermissionPolicy, SnapshotRepository, UserPolicySnapshot};
pub use store::{PersistenceStore, StoreError};
