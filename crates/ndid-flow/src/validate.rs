//! Scenario consistency checks, run before any node is contacted.

use std::collections::HashSet;

use ndid_core::{NodeId, Role};

use crate::error::FlowError;
use crate::plan::project;
use crate::scenario::{Finish, IdpOutcome, Scenario, ServiceAnswer};

/// Reject a scenario whose topology or outcomes cannot produce a
/// well-defined run. Every problem found is listed.
pub fn validate(scenario: &Scenario) -> Result<(), FlowError> {
    let mut problems = Vec::new();
    let request = &scenario.request;

    if scenario.name.trim().is_empty() {
        problems.push("scenario name is empty".to_string());
    }
    check_role(&scenario.rp, Role::Rp, &mut problems);

    if request.min_idp == 0 {
        problems.push("min_idp must be at least 1".into());
    }
    if !(request.min_ial > 0.0 && request.min_aal > 0.0) {
        problems.push("min_ial and min_aal must be positive".into());
    }
    if request.timeout_secs == Some(0) {
        problems.push("request timeout must be positive".into());
    }

    let mut seen = HashSet::new();
    for idp in &scenario.idps {
        check_role(&idp.node_id, Role::Idp, &mut problems);
        if !seen.insert(&idp.node_id) {
            problems.push(format!("{} answers more than once", idp.node_id));
        }
        if !request.idp_id_list.is_empty() && !request.idp_id_list.contains(&idp.node_id) {
            problems.push(format!("{} answers but is not in idp_id_list", idp.node_id));
        }
        let signs =
            !matches!(idp.outcome, IdpOutcome::Error(_)) || !idp.invalid_attempts.is_empty();
        if signs && request.mode.requires_accessor_signature() && idp.accessor.is_none() {
            problems.push(format!("{} needs an accessor binding in {}", idp.node_id, request.mode));
        }
        for attempt in &idp.invalid_attempts {
            if !(400..500).contains(&attempt.expect_status) {
                problems.push(format!(
                    "{}: invalid attempt must expect a 4xx status, not {}",
                    idp.node_id, attempt.expect_status
                ));
            }
        }
    }
    if scenario.idps.len() > request.min_idp as usize {
        problems.push(format!(
            "{} IdPs answer but min_idp is {}",
            scenario.idps.len(),
            request.min_idp
        ));
    }
    if !request.idp_id_list.is_empty() && request.idp_id_list.len() < request.min_idp as usize {
        problems.push(format!(
            "idp_id_list names {} IdPs, fewer than min_idp {}",
            request.idp_id_list.len(),
            request.min_idp
        ));
    }

    let mut services = HashSet::new();
    for item in &request.data_request_list {
        if !services.insert(&item.service_id) {
            problems.push(format!("service {} is requested twice", item.service_id));
        }
        if item.min_as == 0 {
            problems.push(format!("service {}: min_as must be at least 1", item.service_id));
        }
        if !item.as_id_list.is_empty() && item.as_id_list.len() < item.min_as as usize {
            problems.push(format!(
                "service {}: as_id_list names fewer AS nodes than min_as",
                item.service_id
            ));
        }
    }
    for as_participant in &scenario.as_nodes {
        check_role(&as_participant.node_id, Role::As, &mut problems);
        for response in &as_participant.services {
            let Some(item) = request
                .data_request_list
                .iter()
                .find(|i| i.service_id == response.service_id)
            else {
                problems.push(format!(
                    "{} answers {}, which is not requested",
                    as_participant.node_id, response.service_id
                ));
                continue;
            };
            if !item.as_id_list.is_empty() && !item.as_id_list.contains(&as_participant.node_id) {
                problems.push(format!(
                    "{} answers {} but is not in its as_id_list",
                    as_participant.node_id, response.service_id
                ));
            }
        }
    }
    for item in &request.data_request_list {
        let data = scenario
            .responders(&item.service_id)
            .iter()
            .filter(|(_, answer)| matches!(answer, ServiceAnswer::Data(_)))
            .count();
        if data > item.min_as as usize {
            problems.push(format!(
                "service {}: {data} AS nodes send data but min_as is {}",
                item.service_id, item.min_as
            ));
        }
    }

    let projection = project(scenario);
    match (scenario.finish, projection.terminal) {
        (Finish::Auto, false) => problems.push(
            "declared answers do not make the request terminal; finish with close or timeout"
                .into(),
        ),
        (Finish::Close | Finish::Timeout, true) => problems.push(
            "declared answers make the request terminal, so it closes on its own; finish: auto"
                .into(),
        ),
        _ => {}
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(FlowError::HarnessUsage(format!(
            "{}: {}",
            scenario.name,
            problems.join("; ")
        )))
    }
}

fn check_role(node_id: &NodeId, expected: Role, problems: &mut Vec<String>) {
    match node_id.role() {
        Some(role) if role == expected => {}
        Some(role) => problems.push(format!("{node_id} is a {role} node, expected {expected}")),
        None => problems.push(format!("cannot infer the role of {node_id}")),
    }
}
