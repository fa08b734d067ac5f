//! End-to-end scenario runs against the simulated platform.
//!
//! Each test drives one request through the orchestrator and checks the
//! report: final status, the distinct status path, how many snapshots were
//! verified and which message deliveries were confirmed.

mod common;

use common::*;

use ndid_callback::{CallbackHub, Status};
use ndid_client::{HarnessConfig, NodeApi};
use ndid_flow::{FlowError, FlowOrchestrator, FlowReport, Scenario};

async fn run(
    platform: &SimPlatform,
    hub: &CallbackHub,
    config: &HarnessConfig,
    yaml: &str,
) -> Result<FlowReport, FlowError> {
    init_tracing();
    let scenario = Scenario::from_yaml(yaml).unwrap();
    FlowOrchestrator::new(platform, hub, config).run(&scenario).await
}

fn delivered_to(report: &FlowReport, source: &str) -> Vec<String> {
    report
        .deliveries
        .iter()
        .filter(|d| d.source.as_str() == source)
        .flat_map(|d| d.destinations.iter().map(|n| n.as_str().to_string()))
        .collect()
}

#[tokio::test]
async fn mode1_single_idp_accept_completes_and_closes() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: mode1-single-accept
rp: rp1
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Consent to share your data?
  min_ial: 1.1
  min_aal: 1
  min_idp: 1
  idp_id_list: [idp1]
idps:
  - node_id: idp1
    outcome: accept
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Completed);
    assert!(report.closed);
    assert!(!report.timed_out);
    assert_eq!(report.status_events(), 3);
    assert_eq!(report.status_path, [Status::Pending, Status::Completed]);
    assert_eq!(report.idp_answers.len(), 1);
    assert_eq!(report.idp_answers[0].refused_attempts, 0);
    assert_eq!(delivered_to(&report, "rp1"), ["idp1"]);
    assert_eq!(delivered_to(&report, "idp1"), ["rp1"]);
    assert_eq!(report.unmatched_callbacks, 0);
    assert!(report.data.is_none());
    assert!(report.request_id.as_str().starts_with("req-"));

    let current = platform
        .get_request(&node("rp1"), &report.request_id)
        .await
        .unwrap();
    assert_eq!(current.body["status"], "completed");
    assert_eq!(current.body["closed"], true);
}

#[tokio::test]
async fn concurrent_accept_and_reject_end_complicated() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: two-idps-disagree
rp: rp1
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Consent?
  min_ial: 1.1
  min_aal: 1
  min_idp: 2
  idp_id_list: [idp1, idp2]
idps:
  - { node_id: idp1, outcome: accept }
  - { node_id: idp2, outcome: reject }
answer_order: concurrent
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Complicated);
    assert!(report.closed);
    assert_eq!(report.status_events(), 4);
    assert_eq!(
        report.status_path,
        [Status::Pending, Status::Confirmed, Status::Complicated]
    );
    assert_eq!(delivered_to(&report, "rp1"), ["idp1", "idp2"]);
}

#[tokio::test]
async fn data_request_runs_signed_then_received() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: data-request-one-as
rp: rp1
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Share your bank statement?
  min_ial: 1.1
  min_aal: 1
  min_idp: 1
  idp_id_list: [idp1]
  data_request_list:
    - service_id: bank_statement
      as_id_list: [as1]
      min_as: 1
      request_params: '{"format":"pdf"}'
idps:
  - { node_id: idp1, outcome: accept }
as:
  - node_id: as1
    services:
      - service_id: bank_statement
        data: '{"balance":100}'
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Completed);
    assert_eq!(report.status_events(), 5);
    assert_eq!(
        report.status_path,
        [Status::Pending, Status::Confirmed, Status::Completed]
    );
    let data = report.data.as_ref().and_then(|d| d.as_array()).unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["source_node_id"], "as1");
    assert_eq!(data[0]["data"], r#"{"balance":100}"#);
    assert_eq!(delivered_to(&report, "as1"), ["rp1"]);
    assert_eq!(delivered_to(&report, "rp1"), ["idp1", "as1"]);
    assert!(report
        .steps
        .iter()
        .any(|s| s.kind == "data_request" && s.node_id.as_str() == "as1"));
}

#[tokio::test]
async fn as_serving_two_lines_gets_one_data_request_per_line() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: one-as-two-lines
rp: rp1
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Share your statement and profile?
  min_ial: 1.1
  min_aal: 1
  min_idp: 1
  idp_id_list: [idp1]
  data_request_list:
    - { service_id: bank_statement, as_id_list: [as1], min_as: 1 }
    - { service_id: customer_info, as_id_list: [as1], min_as: 1 }
idps:
  - { node_id: idp1, outcome: accept }
as:
  - node_id: as1
    services:
      - { service_id: bank_statement, data: statement }
      - { service_id: customer_info, data: profile }
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Completed);
    assert_eq!(delivered_to(&report, "rp1"), ["idp1", "as1", "as1"]);
    assert_eq!(delivered_to(&report, "as1"), ["rp1", "rp1"]);
    let data = report.data.as_ref().and_then(|d| d.as_array()).unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(
        report
            .steps
            .iter()
            .filter(|s| s.kind == "data_request" && s.node_id.as_str() == "as1")
            .count(),
        2
    );
}

#[tokio::test]
async fn proxy_routed_nodes_are_addressed_by_logical_id() {
    let hub = CallbackHub::new();
    let platform =
        SimPlatform::new(Delivery::Hub(hub.clone())).with_idp("proxy1_idp4", 3.0, 3.0);
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: proxy-single-accept
rp: proxy1_rp4
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Consent through the proxy?
  min_ial: 1.1
  min_aal: 1
  min_idp: 1
  idp_id_list: [proxy1_idp4]
idps:
  - { node_id: proxy1_idp4, outcome: accept }
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Completed);
    assert!(report.closed);
    assert_eq!(delivered_to(&report, "proxy1_rp4"), ["proxy1_idp4"]);
    assert_eq!(delivered_to(&report, "proxy1_idp4"), ["proxy1_rp4"]);
    assert!(delivered_to(&report, "proxy1").is_empty());
    assert!(report
        .steps
        .iter()
        .any(|s| s.kind == "incoming_request" && s.node_id.as_str() == "proxy1_idp4"));
    assert_eq!(report.unmatched_callbacks, 0);
}

#[tokio::test]
async fn mode3_answer_is_signed_after_invalid_attempts_are_refused() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::with_default_accessors(Delivery::Hub(hub.clone()));
    let yaml = format!(
        r#"
name: mode3-invalid-then-accept
rp: rp1
request:
  mode: 3
  namespace: citizen_id
  identifier: "1234567890123"
  message: Consent to open an account?
  min_ial: 2.3
  min_aal: 3
  min_idp: 1
  idp_id_list: [idp1]
idps:
  - node_id: idp1
    outcome: accept
    accessor:
      accessor_id: acc-idp1
      seed: {IDP1_SEED}
    invalid_attempts:
      - {{ mutation: unknown_request_id, expect_error_code: {REQUEST_NOT_FOUND} }}
      - {{ mutation: ial_below_minimum, expect_error_code: {IAL_TOO_LOW} }}
      - {{ mutation: aal_below_minimum, expect_error_code: {AAL_TOO_LOW} }}
      - {{ mutation: missing_signature, expect_error_code: {SIGNATURE_REQUIRED} }}
      - {{ mutation: wrong_signature, expect_error_code: {INVALID_SIGNATURE} }}
"#
    );
    let report = run(&platform, &hub, &config(5), &yaml).await.unwrap();

    assert_eq!(report.final_status, Status::Completed);
    assert_eq!(report.idp_answers[0].refused_attempts, 5);
    // Five refused attempts plus the real answer.
    assert_eq!(platform.calls(), 7);
}

#[tokio::test]
async fn error_answer_leaves_request_open_until_rp_closes() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: accept-and-error-then-close
rp: rp1
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Consent?
  min_ial: 1.1
  min_aal: 1
  min_idp: 2
  idp_id_list: [idp1, idp2]
idps:
  - { node_id: idp1, outcome: accept }
  - { node_id: idp2, outcome: { error: 30000 } }
finish: close
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Confirmed);
    assert!(report.closed);
    assert_eq!(report.status_events(), 4);
    assert_eq!(report.status_path, [Status::Pending, Status::Confirmed]);
    assert!(report
        .steps
        .iter()
        .any(|s| s.kind == "close_request_result"));
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: error-only-times-out
rp: rp1
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Consent?
  min_ial: 1.1
  min_aal: 1
  min_idp: 1
  timeout_secs: 2
  idp_id_list: [idp1]
idps:
  - { node_id: idp1, outcome: { error: 30000 } }
finish: timeout
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Pending);
    assert!(report.timed_out);
    assert!(!report.closed);
    assert_eq!(report.status_events(), 3);
}

#[tokio::test]
async fn empty_idp_list_is_resolved_by_lookup() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone())).with_idp("idp3", 1.5, 3.0);
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: lookup-idps
rp: rp1
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Consent?
  min_ial: 2.3
  min_aal: 3
  min_idp: 1
idps:
  - { node_id: idp1, outcome: accept }
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Completed);
    // idp3 is below min_ial and is not addressed.
    assert_eq!(delivered_to(&report, "rp1"), ["idp1", "idp2"]);
    // idp2 received the request but never answered.
    assert_eq!(report.unmatched_callbacks, 1);
}

#[tokio::test]
async fn as_error_then_data_from_another_as_completes() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    let report = run(
        &platform,
        &hub,
        &config(5),
        r#"
name: as-error-then-data
rp: rp1
request:
  mode: 1
  namespace: citizen_id
  identifier: "1234567890123"
  message: Share your bank statement?
  min_ial: 1.1
  min_aal: 1
  min_idp: 1
  idp_id_list: [idp1]
  data_request_list:
    - { service_id: bank_statement, min_as: 1 }
idps:
  - { node_id: idp1, outcome: accept }
as:
  - node_id: as1
    services: [ { service_id: bank_statement, error: 10101 } ]
  - node_id: as2
    services: [ { service_id: bank_statement, data: statement } ]
"#,
    )
    .await
    .unwrap();

    assert_eq!(report.final_status, Status::Completed);
    assert_eq!(report.status_events(), 5);
    assert_eq!(delivered_to(&report, "rp1"), ["idp1", "as1", "as2"]);
    assert_eq!(delivered_to(&report, "as2"), ["rp1"]);
    assert!(delivered_to(&report, "as1").is_empty());
    let data = report.data.as_ref().and_then(|d| d.as_array()).unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["source_node_id"], "as2");
}

#[tokio::test]
async fn housekeeping_removes_private_messages() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    run(
        &platform,
        &hub,
        &config(5),
        r#"
name: reject-with-housekeeping
rp: rp1
request: { mode: 1, namespace: cid, identifier: "1", message: m, min_ial: 1.1, min_aal: 1, min_idp: 1, idp_id_list: [idp2] }
idps: [ { node_id: idp2, outcome: reject } ]
housekeeping: true
"#,
    )
    .await
    .unwrap();

    // create, answer, remove private messages
    assert_eq!(platform.calls(), 3);
}

#[tokio::test]
async fn runs_on_one_hub_do_not_interfere() {
    let hub = CallbackHub::new();
    let platform = SimPlatform::new(Delivery::Hub(hub.clone()));
    let config = config(5);
    let yaml = |idp: &str| {
        format!(
            r#"
name: sequential-{idp}
rp: rp1
request: {{ mode: 1, namespace: cid, identifier: "1", message: m, min_ial: 1.1, min_aal: 1, min_idp: 1, idp_id_list: [{idp}] }}
idps: [ {{ node_id: {idp}, outcome: accept }} ]
"#
        )
    };
    let first = run(&platform, &hub, &config, &yaml("idp1")).await.unwrap();
    let second = run(&platform, &hub, &config, &yaml("idp2")).await.unwrap();
    assert_ne!(first.request_id, second.request_id);
    assert_eq!(second.status_events(), 3);
    assert_eq!(hub.total_subscribers(), 0);
}
