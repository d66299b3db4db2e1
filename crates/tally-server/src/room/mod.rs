//! Room handles and the host-level room registry.

pub mod handle;
pub mod registry;
