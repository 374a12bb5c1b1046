#![forbid(unsafe_code)]

//! Library side of tubelink: quality catalog, probe model, resolver
//! invocation, and the shared config/security helpers used by the server
//! binary.

pub mod catalog;
pub mod config;
pub mod probe;
pub mod resolver;
pub mod security;
