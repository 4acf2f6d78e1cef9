//! Payloads of user aggregate events.
//!
//! OTP events carry no payload fields the projections read; the user id is
//! the aggregate id.

use serde::Deserialize;

/// Payload of `user.human.u2f.token.added` and
/// `user.human.passwordless.token.added`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebAuthnTokenAdded {
    /// Token id.
    #[serde(rename = "webAuthNTokenId")]
    pub token_id: String,
}

/// Payload of the WebAuthN `token.verified` events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebAuthnTokenVerified {
    /// Token id.
    #[serde(rename = "webAuthNTokenId")]
    pub token_id: String,
    /// Name the user gave the token during verification.
    #[serde(rename = "webAuthNTokenName", default)]
    pub token_name: Option<String>,
}

/// Payload of the WebAuthN `token.removed` events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebAuthnTokenRemoved {
    /// Token id.
    #[serde(rename = "webAuthNTokenId")]
    pub token_id: String,
}
