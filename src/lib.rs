//! Offline cache router, cache store manager and push notification bridge
//! for a progressive web app, driven by lifecycle events from a host.

pub mod cache;
pub mod clients;
pub mod config;
pub mod event;
pub mod logging;
pub mod network;
pub mod push;
pub mod router;
pub mod worker;
