//! Canonicalization of activation requests and the signed proposal
//! token that carries them across trust boundaries.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::Validation;
use serde::{Deserialize, Serialize};
use tracing::trace;

use elevate_common::{ActivationType, Error, ProjectRole, UserId};

use crate::activator::ActivationRequest;
use crate::clients::JwtOracle;

/// The canonical form of an activation request as carried inside a
/// proposal token. Field order is part of the canonical form; reviewers
/// and entitlements are sorted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub id: String,
    pub requesting_user: UserId,
    pub reviewers: Vec<UserId>,
    pub entitlements: Vec<ProjectRole>,
    pub justification: String,
    pub activation_type: ActivationType,
    /// Epoch seconds.
    pub start_time: i64,
    /// Epoch seconds.
    pub end_time: i64,
}

impl TokenPayload {
    pub fn from_request(request: &ActivationRequest) -> Self {
        let span = request.span();
        let mut entitlements = request.entitlements().to_vec();
        entitlements.sort_by_key(ProjectRole::id);
        Self {
            id: request.id().to_string(),
            requesting_user: request.requesting_user().clone(),
            reviewers: request.reviewers().iter().cloned().collect(),
            entitlements,
            justification: request.justification().to_string(),
            activation_type: request.activation_type().clone(),
            start_time: span.start.timestamp(),
            end_time: span.end.timestamp(),
        }
    }

    /// The inverse of [`TokenPayload::from_request`].
    pub fn into_request(self) -> Result<ActivationRequest, Error> {
        let start_time = epoch_seconds(self.start_time)?;
        let end_time = epoch_seconds(self.end_time)?;
        if end_time <= start_time {
            return Err(Error::MalformedRequest(
                "the activation window ends before it starts".to_string(),
            ));
        }
        let reviewers: BTreeSet<UserId> = self.reviewers.into_iter().collect();
        Ok(ActivationRequest::from_parts(
            self.id,
            self.requesting_user,
            reviewers,
            self.entitlements,
            self.justification,
            self.activation_type,
            start_time,
            end_time - start_time,
        ))
    }
}

fn epoch_seconds(seconds: i64) -> Result<DateTime<Utc>, Error> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::MalformedRequest(format!("invalid timestamp: {seconds}")))
}

/// A signed proposal carrying a canonicalized request out of process.
#[derive(Clone, Debug)]
pub struct ProposalToken {
    pub token: String,
    pub issue_time: DateTime<Utc>,
    /// Always `issue_time` plus the validity the token was signed with.
    pub expiry_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ProposalClaims {
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    payload: TokenPayload,
}

/// Issues and verifies proposal tokens through the signing oracle.
///
/// Tokens are audience-bound to the oracle's own identity: nothing but
/// this broker (via the same oracle identity) accepts them.
pub struct TokenSigner {
    oracle: Arc<dyn JwtOracle>,
}

impl TokenSigner {
    pub fn new(oracle: Arc<dyn JwtOracle>) -> Self {
        Self { oracle }
    }

    pub async fn sign(
        &self,
        payload: TokenPayload,
        validity: Duration,
    ) -> Result<ProposalToken, Error> {
        let issue_time = Utc::now();
        let expiry_time = issue_time + validity;
        let identity = self.oracle.signing_identity().to_string();
        let claims = ProposalClaims {
            aud: identity.clone(),
            iss: identity,
            iat: issue_time.timestamp(),
            exp: expiry_time.timestamp(),
            payload,
        };
        let claims = serde_json::to_string(&claims)
            .map_err(|err| Error::Transient(anyhow::Error::new(err)))?;
        let token = self.oracle.sign_jwt(&claims).await?;
        Ok(ProposalToken {
            token,
            issue_time,
            expiry_time,
        })
    }

    /// Verify a returned token against the oracle's current keys. All
    /// failures collapse into [`Error::TokenVerification`]; details are
    /// traced, never surfaced.
    pub async fn verify(&self, token: &str) -> Result<TokenPayload, Error> {
        let identity = self.oracle.signing_identity().to_string();
        for (algorithm, key) in self.oracle.decoding_keys().await? {
            let mut validation = Validation::new(algorithm);
            validation.set_issuer(&[&identity]);
            validation.set_audience(&[&identity]);
            validation.set_required_spec_claims(&["exp", "iss", "aud"]);
            match jsonwebtoken::decode::<ProposalClaims>(token, &key, &validation) {
                Ok(data) => return Ok(data.claims.payload),
                Err(err) => {
                    trace!(
                        error = &err as &dyn std::error::Error,
                        "token did not verify against key"
                    );
                }
            }
        }
        trace!(jwks = %self.oracle.jwks_url(), "no key accepted the token");
        Err(Error::TokenVerification)
    }
}
