//! # gatehouse-auth
//!
//! Session handling for the Gatehouse gateway.
//!
//! ## Modules
//!
//! - [`config`] - Cookie names, JWT settings and identity-provider origin
//! - [`cookies`] - Effective cookie domain and cookie builders
//! - [`jwt`] - Short-lived access tokens
//! - [`identity_provider`] - Client for the external identity provider
//! - [`validator`] - Token Validator and logout

pub mod config;
pub mod cookies;
pub mod error;
pub mod identity_provider;
pub mod jwt;
pub mod validator;

pub use config::{CookieConfig, IdentityProviderConfig, JwtConfig};
pub use error::AuthError;
pub use identity_provider::{IdentityProviderClient, IdentityProviderError};
pub use jwt::{AccessClaims, AccessToken, JwtError, JwtSigner};
pub use validator::TokenValidator;

/// Type alias for authentication results.
pub type AuthResult<T> = Result<T, AuthError>;
