//! Strongly-typed identifiers used across the optimizer.
//!
//! Downstream crates should *not* use raw integers for arena indices or
//! materialized-data handles.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

// Index into a plan arena (`LogicalPlan::nodes` / `PhysicalPlan::nodes`).
new_id!(NodeId);
// Opaque reference to data materialized and held by the execution substrate.
new_id!(HandleId);
