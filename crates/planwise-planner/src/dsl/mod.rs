//! Pipeline description formats that build a `LogicalPlan`.

pub mod yaml;
