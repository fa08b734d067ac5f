//! Consent signatures for mode 2 and 3 answers.

use ndid_callback::envelope::IncomingRequest;
use ndid_core::AccessorId;
use ndid_crypto::{AccessorKeyPair, CryptoError};

use crate::scenario::IdpParticipant;

/// Chooses the accessor an IdP answers with and produces its signature.
pub trait ConsentSigner: Send + Sync {
    /// Accessor to answer `incoming` with, if the IdP has one.
    fn select_accessor(
        &self,
        idp: &IdpParticipant,
        incoming: &IncomingRequest,
    ) -> Option<AccessorId>;

    /// Base64 signature over the padded `request_message_hash`.
    fn sign(
        &self,
        idp: &IdpParticipant,
        accessor_id: &AccessorId,
        request_message_hash: &str,
    ) -> Result<String, CryptoError>;
}

/// Signs with the accessor binding declared in the scenario.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScenarioSigner;

impl ConsentSigner for ScenarioSigner {
    fn select_accessor(
        &self,
        idp: &IdpParticipant,
        _incoming: &IncomingRequest,
    ) -> Option<AccessorId> {
        idp.accessor.as_ref().map(|a| a.accessor_id.clone())
    }

    fn sign(
        &self,
        idp: &IdpParticipant,
        accessor_id: &AccessorId,
        request_message_hash: &str,
    ) -> Result<String, CryptoError> {
        let binding = idp
            .accessor
            .as_ref()
            .filter(|a| &a.accessor_id == accessor_id)
            .ok_or_else(|| {
                CryptoError::Key(format!("{} has no key for accessor {accessor_id}", idp.node_id))
            })?;
        AccessorKeyPair::from_seed_base64(binding.seed.expose())?.sign_consent(request_message_hash)
    }
}
