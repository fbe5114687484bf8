#![forbid(unsafe_code)]

pub mod common;
pub mod ph1pod;
pub mod ph1route;
pub mod ph1scan;

pub use common::{ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate};
