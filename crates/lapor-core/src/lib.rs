//! Core library for the lapor citizen-reporting platform.
//!
//! This crate holds everything the individual services share:
//!
//! - **Domain model** ([`domain`]): reports, cases, workflow statuses, and
//!   the fixed category-to-agency routing table.
//! - **Event contracts** ([`events`]): the JSON envelope published on the
//!   bus and the typed payloads for every event in the vocabulary.
//! - **Event bus** ([`bus`]): a log-structured stream with named consumer
//!   groups on embedded `SQLite`. At-least-once delivery with per-consumer
//!   pending acknowledgement.
//! - **Identity** ([`auth`]): HS256 bearer tokens carrying
//!   `{sub, role, agency}` and the demo login roster.
//! - **Configuration** ([`config`]): environment-driven per-service
//!   settings and store bootstrap.
//! - **SLA configuration** ([`sla`]): the process-wide resolution deadline
//!   duration behind a reader-writer lock.
//!
//! The services themselves (HTTP surfaces, consumers, the projection
//! fan-out worker, the SLA sweeper) live in `lapor-node`.

pub mod auth;
pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod sla;
pub mod task;
pub mod time;

pub use error::ServiceError;
pub use task::run_blocking;
