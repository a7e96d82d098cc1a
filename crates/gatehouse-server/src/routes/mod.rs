//! HTTP routes.
//!
//! - `boot` - `/boot`, `/boot/companion`, `/boot/features`
//! - `users` - `/users/me` and the account reads, `/users/logout`
//! - `redirects` - referral redirector (`/landing`, `/get`, `/download`)
//! - `flagsmith` - flag provider webhook
//! - `health` - liveness and readiness

pub mod boot;
pub mod flagsmith;
pub mod health;
pub mod redirects;
pub mod users;
