#![forbid(unsafe_code)]

pub mod capabilities;
pub mod ph1pod;
pub mod ph1scan;
pub mod route_session;
