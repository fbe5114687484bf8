#![forbid(unsafe_code)]

pub mod expiring;
pub mod ph1geo;
pub mod ph1pod;
pub mod ph1scan;
