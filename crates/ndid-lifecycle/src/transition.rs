//! # Status Transitions
//!
//! | from        | to                                           |
//! |-------------|----------------------------------------------|
//! | pending     | pending, confirmed, rejected, complicated, completed |
//! | confirmed   | confirmed, complicated, completed            |
//! | rejected    | rejected, complicated                        |
//! | complicated | complicated                                  |
//! | completed   | completed                                    |
//!
//! Every status may repeat (per-answer and per-data snapshots). `closed`
//! and `timed_out` are flags on a snapshot, not statuses, and are handled
//! by the monitor.

use ndid_callback::Status;

/// Statuses reachable from `from` in one snapshot.
pub fn valid_transitions(from: Status) -> &'static [Status] {
    match from {
        Status::Pending => &[
            Status::Pending,
            Status::Confirmed,
            Status::Rejected,
            Status::Complicated,
            Status::Completed,
        ],
        Status::Confirmed => &[Status::Confirmed, Status::Complicated, Status::Completed],
        Status::Rejected => &[Status::Rejected, Status::Complicated],
        Status::Complicated => &[Status::Complicated],
        Status::Completed => &[Status::Completed],
    }
}

/// Whether `from -> to` is a legal step.
pub fn is_legal(from: Status, to: Status) -> bool {
    valid_transitions(from).contains(&to)
}

/// Whether no other status can follow.
pub fn is_absorbing(status: Status) -> bool {
    valid_transitions(status) == [status]
}
