use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use url::Url;

use elevate_common::Error;

/// The signing oracle backing proposal tokens.
///
/// Signing happens out of process against keys this broker never holds;
/// the oracle is externally synchronized and treated as a thread-safe
/// black box.
#[async_trait]
pub trait JwtOracle: Send + Sync {
    /// The service account this oracle signs as. Proposal tokens carry
    /// it as both issuer and audience.
    fn signing_identity(&self) -> &str;

    /// Sign a serialized claim set, returning the compact JWT.
    async fn sign_jwt(&self, claims: &str) -> Result<String, Error>;

    /// Where the oracle's public key set is served.
    fn jwks_url(&self) -> Url;

    /// Current decoding keys for the verify path, paired with the
    /// algorithm each is used with.
    async fn decoding_keys(&self) -> Result<Vec<(Algorithm, DecodingKey)>, Error>;
}
