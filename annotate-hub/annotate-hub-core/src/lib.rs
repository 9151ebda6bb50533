pub mod access;
pub mod annotations;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod files;
pub mod invite;
pub mod links;
pub mod model;
pub mod roles;
pub mod service;
pub mod storage;
#[cfg(test)]
mod test_support;

pub use access::{resolve_role, Role};
pub use error::{AccessError, AccessResult};
pub use service::{AccessService, HubContext};
