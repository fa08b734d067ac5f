//! # Run Subcommand
//!
//! Runs scenario files against the configured nodes. The callback receiver
//! lives for the whole invocation; each scenario gets its own correlation
//! registry inside the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use ndid_callback::{receiver, CallbackHub};
use ndid_client::{HarnessConfig, NdidClient};
use ndid_flow::{register_callbacks, FlowOrchestrator, Scenario};

use crate::outcome::{exit_code, worst, PASS};
use crate::record::JsonlRecorder;

/// Arguments for `ndid-e2e run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario file (YAML). Repeat to run several in order.
    #[arg(long = "scenario", required = true)]
    pub scenarios: Vec<PathBuf>,

    /// Append every received callback to this JSONL file.
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Print reports as JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Assume the nodes already deliver callbacks to the receiver.
    #[arg(long)]
    pub skip_callback_setup: bool,
}

pub async fn run_scenarios(args: &RunArgs, config_path: Option<&Path>) -> Result<u8> {
    let config = HarnessConfig::from_env(config_path).context("cannot load harness configuration")?;
    let client = NdidClient::new(&config)?;
    let hub = CallbackHub::new();
    let _recording = match &args.record {
        Some(path) => {
            let recorder = JsonlRecorder::append_to(path)
                .with_context(|| format!("cannot open {} for recording", path.display()))?;
            Some(hub.tap(Arc::new(recorder)))
        }
        None => None,
    };
    let receiver = receiver::spawn(hub.clone(), config.callback_listen, config.body_limit_bytes)
        .await
        .with_context(|| format!("cannot listen on {}", config.callback_listen))?;

    let mut codes = Vec::with_capacity(args.scenarios.len());
    for path in &args.scenarios {
        codes.push(run_one(args, path, &client, &hub, &config).await?);
    }

    receiver.shutdown().await.context("callback receiver failed")?;
    Ok(worst(codes))
}

async fn run_one(
    args: &RunArgs,
    path: &Path,
    client: &NdidClient,
    hub: &CallbackHub,
    config: &HarnessConfig,
) -> Result<u8> {
    let outcome = async {
        let scenario = Scenario::load(path)?;
        if !args.skip_callback_setup {
            register_callbacks(client, config, scenario.involved_nodes().iter()).await?;
        }
        FlowOrchestrator::new(client, hub, config).run(&scenario).await
    }
    .await;

    match outcome {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("PASS {report}");
            }
            Ok(PASS)
        }
        Err(e) => {
            println!("FAIL {}: {e}", path.display());
            Ok(exit_code(e.class()))
        }
    }
}
