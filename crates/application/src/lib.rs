#![forbid(unsafe_code)]

pub mod ipset_service_impl;

pub use ipset_service_impl::{IpSetAppService, SyncReport};
