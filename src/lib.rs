//! Azure credential resolution
//!
//! Given an [`auth::AuthConfiguration`] (or none at all), work out which login
//! strategy is usable on this host, build a credential from it, prove it with
//! a live token round-trip and expose tokens and subscriptions through the
//! resolved [`auth::Account`].

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
