//! Process exit codes.

use ndid_flow::FailureClass;

pub const PASS: u8 = 0;
pub const CONFORMANCE: u8 = 1;
pub const LIVENESS: u8 = 2;
pub const HARNESS_USAGE: u8 = 3;
pub const TRANSPORT: u8 = 4;

/// Exit code for a failed scenario.
pub fn exit_code(class: FailureClass) -> u8 {
    match class {
        FailureClass::Conformance => CONFORMANCE,
        FailureClass::Liveness => LIVENESS,
        FailureClass::HarnessUsage => HARNESS_USAGE,
        FailureClass::Transport => TRANSPORT,
    }
}

/// Combine the codes of several scenarios: any failure wins, the lowest
/// failing code first.
pub fn worst(codes: impl IntoIterator<Item = u8>) -> u8 {
    codes.into_iter().filter(|c| *c != PASS).min().unwrap_or(PASS)
}
