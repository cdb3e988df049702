//! Shared building blocks for talking to the eSTUDNA2 cloud: the HTTP
//! client wrapper and identifier types.

pub mod http;
pub mod types;
