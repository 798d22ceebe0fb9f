// ABOUTME: Quorum chat assistant: routing, arbitration, built-in modules,
// ABOUTME: service adapters, and the self-test harness.

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod modules;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod selftest;
