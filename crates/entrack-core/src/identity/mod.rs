//! Key-based indexes over tracked entries
//!
//! One [`IdentityMap`] exists per key of a hierarchy root. The primary-key map
//! of a dependent root also owns the [`DependentsMap`] of every foreign key
//! declared in that hierarchy; those are built on first use and maintained
//! incrementally afterwards.

mod dependents_map;
mod identity_map;

pub use dependents_map::DependentsMap;
pub use identity_map::IdentityMap;
