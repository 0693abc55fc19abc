//! Federated login core.
//!
//! A browser is sent to a third-party identity provider, comes back with an
//! authorization code, and leaves with a one-time code it can hand to a backend.
//! The backend redeems that code for an access/refresh token pair signed by this
//! service; the refresh token can later be traded for fresh access tokens.

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth;
pub mod otc;
pub mod service;
pub mod session;
pub mod store;
pub mod token;
pub mod utils;
