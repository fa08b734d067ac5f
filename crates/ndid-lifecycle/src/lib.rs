//! # ndid-lifecycle — Request Lifecycle Model
//!
//! The protocol rules a request's `request_status` callbacks must obey:
//!
//! - [`transition`]: which status may follow which.
//! - [`invariants`]: what each status implies about the counted fields,
//!   given how the IdPs answered.
//! - [`expected`]: an expected payload compared field by field.
//! - [`monitor`]: the sequence checker (monotonic counters, block-height
//!   ordering, terminal uniqueness) with a transition log.
//!
//! Every failure names the field or rule that broke, so a conformance
//! report points directly at the offending callback.

pub mod error;
pub mod expected;
pub mod invariants;
pub mod monitor;
pub mod transition;

pub use error::{ConformanceError, LifecycleError};
pub use expected::{service_progress, validity_for, ExpectedStatus, ValidityOrder};
pub use invariants::{check_invariants, Answer, Tally};
pub use monitor::{LifecycleMonitor, TransitionRecord};
pub use transition::{is_absorbing, is_legal, valid_transitions};
