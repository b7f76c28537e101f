//! Scenario tests: whole runs driven through the runner with mocked services and actions

#[path = "../helpers.rs"]
mod helpers;

mod failure_handling;
mod idempotence;
mod secret_redaction;
mod service_readiness;
mod success_chain;
mod trigger_filter;
