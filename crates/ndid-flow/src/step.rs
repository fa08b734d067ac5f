//! Awaiting expectations within a step budget.

use std::time::Duration;

use ndid_callback::{Callback, CallbackEnvelope, PendingCallback};
use ndid_lifecycle::ConformanceError;

use crate::error::FlowError;

/// Await `pending` for at most `budget`.
///
/// Expiry is a liveness failure; the expectation is dropped, so a late
/// callback lands in the unmatched log. A callback of the expected kind
/// that failed to decode is a conformance failure naming the field.
pub async fn await_callback(
    step: &str,
    budget: Duration,
    pending: PendingCallback,
) -> Result<CallbackEnvelope, FlowError> {
    match tokio::time::timeout(budget, pending).await {
        Ok(Ok(envelope)) => {
            tracing::debug!(
                step,
                kind = envelope.kind_label(),
                node = %envelope.node_id,
                "callback observed"
            );
            reject_malformed(step, &envelope)?;
            Ok(envelope)
        }
        Ok(Err(_)) => Err(FlowError::Abandoned {
            step: step.to_string(),
        }),
        Err(_) => {
            tracing::warn!(step, ?budget, "step budget exhausted");
            Err(FlowError::Liveness {
                step: step.to_string(),
                budget,
            })
        }
    }
}

/// Fail on a body whose known `type` did not decode.
pub fn reject_malformed(step: &str, envelope: &CallbackEnvelope) -> Result<(), FlowError> {
    let Some((kind, opaque)) = envelope.malformed() else {
        return Ok(());
    };
    let context = match envelope.request_id() {
        Some(request_id) => format!("{kind} from {} for {request_id}", envelope.node_id),
        None => format!("{kind} from {}", envelope.node_id),
    };
    Err(FlowError::conformance(
        step,
        ConformanceError::new(
            context,
            opaque.failing_field().unwrap_or_else(|| "body".to_string()),
            format!("a decodable {kind}"),
            opaque.decode_error.as_deref().unwrap_or_default(),
        ),
    ))
}

/// Unwrap the body variant a step expects.
pub fn body<T>(
    step: &str,
    envelope: CallbackEnvelope,
    pick: impl FnOnce(Callback) -> Option<T>,
) -> Result<T, FlowError> {
    let label = envelope.kind_label().to_string();
    let node = envelope.node_id.clone();
    reject_malformed(step, &envelope)?;
    pick(envelope.callback).ok_or_else(|| {
        FlowError::conformance(
            step,
            ConformanceError::new(format!("callback from {node}"), "type", step, label),
        )
    })
}

/// Require `success: true` on a `*_result` callback.
pub fn require_success(step: &str, envelope: &CallbackEnvelope) -> Result<(), FlowError> {
    match envelope.success() {
        Some(true) => Ok(()),
        other => {
            let actual = match (&envelope.callback, other) {
                (Callback::CreateRequestResult(r), _) => failure_text(r.error.as_ref()),
                (Callback::ResponseResult(r), _) => failure_text(r.error.as_ref()),
                (Callback::SendDataResult(r), _) => failure_text(r.error.as_ref()),
                (Callback::CloseRequestResult(r) | Callback::RevokeAccessorResult(r), _) => {
                    failure_text(r.error.as_ref())
                }
                (_, Some(flag)) => flag.to_string(),
                (_, None) => "absent".to_string(),
            };
            Err(FlowError::conformance(
                step,
                ConformanceError::new(
                    format!("{} from {}", envelope.kind_label(), envelope.node_id),
                    "success",
                    true,
                    actual,
                ),
            ))
        }
    }
}

fn failure_text(error: Option<&ndid_callback::CallbackFailure>) -> String {
    match error {
        Some(e) if e.message.is_empty() => format!("false (error {})", e.code),
        Some(e) => format!("false (error {}: {})", e.code, e.message),
        None => "false".to_string(),
    }
}
