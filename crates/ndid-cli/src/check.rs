//! # Check Subcommand
//!
//! Replays the `request_status` callbacks of a recorded JSONL log through
//! the lifecycle monitor, one request at a time.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use ndid_callback::{CallbackEnvelope, CallbackKind, RequestStatus};
use ndid_core::{NodeId, RequestId};
use ndid_lifecycle::LifecycleMonitor;

use crate::outcome::{CONFORMANCE, PASS};

/// Arguments for `ndid-e2e check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Callback log written by `run --record`.
    #[arg(long)]
    pub log: PathBuf,
}

/// Status snapshots of one request as seen on one node's channel.
#[derive(Debug)]
pub struct StatusHistory {
    pub node_id: NodeId,
    pub request_id: RequestId,
    pub snapshots: Vec<RequestStatus>,
    /// `request_status` lines that failed to decode, with their line number.
    pub malformed: Vec<String>,
}

impl StatusHistory {
    fn new(node_id: NodeId, request_id: RequestId) -> Self {
        Self {
            node_id,
            request_id,
            snapshots: Vec::new(),
            malformed: Vec::new(),
        }
    }
}

pub fn run_check(args: &CheckArgs) -> Result<u8> {
    let file = File::open(&args.log)
        .with_context(|| format!("cannot open callback log {}", args.log.display()))?;
    let histories = read_status_histories(BufReader::new(file))
        .with_context(|| format!("cannot read callback log {}", args.log.display()))?;
    if histories.is_empty() {
        bail!("{} holds no request_status callbacks", args.log.display());
    }

    let mut code = PASS;
    for history in &histories {
        if !history.malformed.is_empty() {
            for problem in &history.malformed {
                println!("FAIL {} {}: {problem}", history.node_id, history.request_id);
            }
            code = CONFORMANCE;
            continue;
        }
        match LifecycleMonitor::verify(history.request_id.clone(), history.snapshots.iter()) {
            Ok(monitor) => {
                let path: Vec<&str> = monitor.status_path().iter().map(|s| s.as_str()).collect();
                println!(
                    "PASS {} {}: {} ({} snapshots)",
                    history.node_id,
                    history.request_id,
                    path.join(" -> "),
                    history.snapshots.len()
                );
            }
            Err(e) => {
                println!("FAIL {} {}: {e}", history.node_id, history.request_id);
                code = CONFORMANCE;
            }
        }
    }
    Ok(code)
}

/// Group the status snapshots of a log by node and request, in first-seen
/// order. Undecodable snapshots are kept as problems; other callback
/// kinds are skipped.
pub fn read_status_histories(reader: impl BufRead) -> Result<Vec<StatusHistory>> {
    let mut histories: Vec<StatusHistory> = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let number = index + 1;
        let value: serde_json::Value =
            serde_json::from_str(&line).with_context(|| format!("line {number} is not JSON"))?;
        let envelope = CallbackEnvelope::from_json(value)
            .with_context(|| format!("line {number} is not a callback envelope"))?;
        if let Some((CallbackKind::RequestStatus, opaque)) = envelope.malformed() {
            let Some(request_id) = &opaque.request_id else {
                bail!("line {number} is an undecodable request_status without a request_id");
            };
            let problem = format!(
                "line {number}: undecodable request_status, field `{}`: {}",
                opaque.failing_field().unwrap_or_else(|| "body".to_string()),
                opaque.decode_error.as_deref().unwrap_or_default()
            );
            history_of(&mut histories, &envelope.node_id, request_id)
                .malformed
                .push(problem);
            continue;
        }
        let Some(snapshot) = envelope.as_request_status() else {
            continue;
        };
        history_of(&mut histories, &envelope.node_id, &snapshot.request_id)
            .snapshots
            .push(snapshot.clone());
    }
    Ok(histories)
}

fn history_of<'a>(
    histories: &'a mut Vec<StatusHistory>,
    node_id: &NodeId,
    request_id: &RequestId,
) -> &'a mut StatusHistory {
    let index = match histories
        .iter()
        .position(|h| &h.node_id == node_id && &h.request_id == request_id)
    {
        Some(index) => index,
        None => {
            histories.push(StatusHistory::new(node_id.clone(), request_id.clone()));
            histories.len() - 1
        }
    };
    &mut histories[index]
}
