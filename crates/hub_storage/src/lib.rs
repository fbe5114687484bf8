#![forbid(unsafe_code)]

pub mod fixture;
pub mod repo;
pub mod route_store;
