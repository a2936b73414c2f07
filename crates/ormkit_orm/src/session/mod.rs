//! Session state: identity map, snapshots, change sets, the unit of work
//! and the session facade.

mod change_set;
mod identity_map;
mod repository;
#[allow(clippy::module_inception)]
mod session;
mod snapshot;
mod unit_of_work;

pub use change_set::{
    compute_change_set, ChangeSet, DirtyField, FkChange, LinkOperation, RefTarget, UpdateRecord,
};
pub use identity_map::{EntityState, IdentityMap, ManagedSlot};
pub use repository::Repository;
pub use session::Session;
pub use snapshot::{values_equal, Snapshot};
pub use unit_of_work::{FlushOptions, FlushReport, UnitOfWork};
