//! # ndid-cli
//!
//! Runner for the NDID end-to-end harness, installed as `ndid-e2e`.
//!
//! ## Subcommands
//!
//! - `run`: start the callback receiver, point every involved node at it,
//!   run one or more scenario files and print their reports.
//! - `check`: replay a recorded callback log through the lifecycle
//!   monitor.
//!
//! Handlers delegate to `ndid-flow` and `ndid-lifecycle`; this crate only
//! wires configuration, the receiver and output together.

pub mod check;
pub mod outcome;
pub mod record;
pub mod run;
