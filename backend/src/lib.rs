//! Outcome reconciliation and progression engine for the community match bot.
//!
//! Players self-report scores; the reconciler turns agreeing reports into a
//! single result and settles it into rep, challenge progression and the club
//! league. Disagreements go to moderators untouched.

pub mod api_error;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod locks;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod telemetry;
