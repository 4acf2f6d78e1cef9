//! Concrete projections.
//!
//! - [`app`]: applications with their API and OIDC configurations
//! - [`user_auth_method`]: OTP, U2F and passwordless methods of users
//! - [`cascade`]: instance and organisation removal, shared by both

pub mod app;
pub mod cascade;
pub mod user_auth_method;

pub use app::AppProjection;
pub use user_auth_method::UserAuthMethodProjection;

use crate::reducer::{Registry, RegistryError};

/// A registry holding every built-in projection.
///
/// # Errors
///
/// Only on miswiring, which the tests rule out.
pub fn default_registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    registry.register(&AppProjection)?;
    registry.register(&UserAuthMethodProjection)?;
    Ok(registry)
}
