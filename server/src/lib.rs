//! SmartServe Server - Restaurant staff authentication and realtime order relay.
//!
//! This crate provides the SmartServe backend, responsible for:
//! - Issuing signed session tokens to restaurant staff
//! - Guarding organization-scoped routes with those tokens
//! - Relaying order events between connected viewers in real time
//!
//! # Architecture
//!
//! Tokens are stateless: once issued they are verified with the signing
//! secret alone. The realtime channel keeps only the set of live
//! connections; events are relayed and forgotten.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod restaurants;
pub mod routes;
pub mod types;
