//! Expected snapshots compared field by field.

use ndid_callback::{IdpValidity, RequestStatus, ServiceProgress, Status};
use ndid_core::{Mode, NodeId, RequestId, ServiceId};

use crate::error::ConformanceError;

/// How the validity list is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidityOrder {
    /// Entries must appear in answer order.
    #[default]
    InOrder,
    /// Entries may appear in any order (simultaneous answers).
    AnyOrder,
}

/// The payload a `request_status` callback must carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedStatus {
    pub request_id: RequestId,
    pub status: Status,
    pub mode: Option<Mode>,
    pub min_idp: Option<u32>,
    pub answered_idp_count: u32,
    pub validity: Vec<IdpValidity>,
    pub validity_order: ValidityOrder,
    pub services: Vec<ServiceProgress>,
    pub closed: bool,
    pub timed_out: bool,
}

impl ExpectedStatus {
    /// Nothing answered, no services, not closed.
    pub fn new(request_id: RequestId, status: Status) -> Self {
        Self {
            request_id,
            status,
            mode: None,
            min_idp: None,
            answered_idp_count: 0,
            validity: Vec::new(),
            validity_order: ValidityOrder::InOrder,
            services: Vec::new(),
            closed: false,
            timed_out: false,
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn min_idp(mut self, min_idp: u32) -> Self {
        self.min_idp = Some(min_idp);
        self
    }

    /// Expect these validity entries; the answered count follows.
    pub fn validity(mut self, validity: Vec<IdpValidity>) -> Self {
        self.answered_idp_count = u32::try_from(validity.len()).unwrap_or(u32::MAX);
        self.validity = validity;
        self
    }

    pub fn any_order(mut self) -> Self {
        self.validity_order = ValidityOrder::AnyOrder;
        self
    }

    pub fn services(mut self, services: Vec<ServiceProgress>) -> Self {
        self.services = services;
        self
    }

    pub fn closed(mut self, closed: bool) -> Self {
        self.closed = closed;
        self
    }

    pub fn timed_out(mut self, timed_out: bool) -> Self {
        self.timed_out = timed_out;
        self
    }

    /// Compare against `observed`, failing on the first differing field.
    pub fn check(&self, observed: &RequestStatus) -> Result<(), ConformanceError> {
        let context = format!(
            "request_status for {} at {}",
            observed.request_id, observed.block_height
        );
        let mismatch = |field: &str, expected: &dyn ToString, actual: &dyn ToString| {
            Err(ConformanceError::new(
                context.clone(),
                field,
                expected.to_string(),
                actual.to_string(),
            ))
        };

        if observed.request_id != self.request_id {
            return mismatch("request_id", &self.request_id, &observed.request_id);
        }
        if observed.status != self.status {
            return mismatch("status", &self.status, &observed.status);
        }
        if let (Some(want), Some(got)) = (self.mode, observed.mode) {
            if want != got {
                return mismatch("mode", &want, &got);
            }
        }
        if let (Some(want), Some(got)) = (self.min_idp, observed.min_idp) {
            if want != got {
                return mismatch("min_idp", &want, &got);
            }
        }
        if observed.answered_count() != self.answered_idp_count {
            return mismatch(
                "answered_idp_count",
                &self.answered_idp_count,
                &observed.answered_count(),
            );
        }
        self.check_validity(observed.validity())
            .map_err(|(field, expected, actual)| {
                ConformanceError::new(context.clone(), field, expected, actual)
            })?;
        self.check_services(&observed.service_list)
            .map_err(|(field, expected, actual)| {
                ConformanceError::new(context.clone(), field, expected, actual)
            })?;
        if observed.closed != self.closed {
            return mismatch("closed", &self.closed, &observed.closed);
        }
        if observed.timed_out != self.timed_out {
            return mismatch("timed_out", &self.timed_out, &observed.timed_out);
        }
        Ok(())
    }

    fn check_validity(&self, observed: &[IdpValidity]) -> Result<(), (String, String, String)> {
        if observed.len() != self.validity.len() {
            return Err((
                "response_valid_list.len".into(),
                self.validity.len().to_string(),
                observed.len().to_string(),
            ));
        }
        match self.validity_order {
            ValidityOrder::InOrder => {
                for (i, (want, got)) in self.validity.iter().zip(observed).enumerate() {
                    compare_entry(&format!("response_valid_list[{i}]"), want, got)?;
                }
            }
            ValidityOrder::AnyOrder => {
                for want in &self.validity {
                    let field = format!("response_valid_list[{}]", want.idp_id);
                    let got = observed
                        .iter()
                        .find(|g| g.idp_id == want.idp_id)
                        .ok_or_else(|| (field.clone(), "present".to_string(), "absent".to_string()))?;
                    compare_entry(&field, want, got)?;
                }
            }
        }
        Ok(())
    }

    fn check_services(
        &self,
        observed: &[ServiceProgress],
    ) -> Result<(), (String, String, String)> {
        if observed.len() != self.services.len() {
            return Err((
                "service_list.len".into(),
                self.services.len().to_string(),
                observed.len().to_string(),
            ));
        }
        for want in &self.services {
            let field = |name: &str| format!("service_list[{}].{name}", want.service_id);
            let got = observed
                .iter()
                .find(|g| g.service_id == want.service_id)
                .ok_or_else(|| {
                    (
                        format!("service_list[{}]", want.service_id),
                        "present".to_string(),
                        "absent".to_string(),
                    )
                })?;
            for (name, w, g) in [
                ("min_as", want.min_as, got.min_as),
                ("signed_data_count", want.signed_data_count, got.signed_data_count),
                ("received_data_count", want.received_data_count, got.received_data_count),
            ] {
                if w != g {
                    return Err((field(name), w.to_string(), g.to_string()));
                }
            }
        }
        Ok(())
    }
}

fn compare_entry(
    field: &str,
    want: &IdpValidity,
    got: &IdpValidity,
) -> Result<(), (String, String, String)> {
    if want.idp_id != got.idp_id {
        return Err((
            format!("{field}.idp_id"),
            want.idp_id.to_string(),
            got.idp_id.to_string(),
        ));
    }
    if want.valid_signature != got.valid_signature {
        return Err((
            format!("{field}.valid_signature"),
            show(want.valid_signature),
            show(got.valid_signature),
        ));
    }
    if want.valid_ial != got.valid_ial {
        return Err((
            format!("{field}.valid_ial"),
            show(want.valid_ial),
            show(got.valid_ial),
        ));
    }
    Ok(())
}

fn show(flag: Option<bool>) -> String {
    flag.map_or_else(|| "null".to_string(), |b| b.to_string())
}

/// Validity entry an IdP's answer should produce in `mode`.
///
/// Mode 1 answers are not verified by the platform (`null`/`null`); modes
/// 2 and 3 carry a verified accessor signature and IAL.
pub fn validity_for(idp_id: NodeId, mode: Mode, verified: bool) -> IdpValidity {
    match mode {
        Mode::One => IdpValidity {
            idp_id,
            valid_signature: None,
            valid_ial: None,
        },
        Mode::Two | Mode::Three => IdpValidity {
            idp_id,
            valid_signature: Some(verified),
            valid_ial: Some(verified),
        },
    }
}

/// Initial progress entry for a service line item.
pub fn service_progress(service_id: ServiceId, min_as: u32, signed: u32, received: u32) -> ServiceProgress {
    ServiceProgress {
        service_id,
        min_as,
        signed_data_count: signed,
        received_data_count: received,
    }
}
