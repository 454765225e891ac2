//! Service implementations for the lapor platform.
//!
//! Each module is one deployable service; the binary picks one with a
//! subcommand. They communicate only through the shared event stream and
//! never touch each other's stores:
//!
//! - [`citizen`] — submitter-facing command and query paths, plus the
//!   consumer that keeps the submitter's feed current.
//! - [`operations`] — officer-facing case handling and the router that
//!   turns new reports into agency inbox rows.
//! - [`workflow`] — status projection, SLA jobs, notifications, and the
//!   breach sweeper.
//! - [`projection`] — the fan-out worker that materializes the master
//!   read model across every replica.
//! - [`query`] — read-only master list, by-id lookup, and statistics.
//! - [`intake`] — operator-entered reports and corrections.

pub mod citizen;
pub mod http;
pub mod intake;
pub mod operations;
pub mod projection;
pub mod query;
pub mod workflow;
