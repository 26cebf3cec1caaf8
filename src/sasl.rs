//! The SASL mechanism library is named in `spec.md` §1 as an external
//! collaborator, consumed only through the small interface below. This
//! crate ships a working `SIMPLE`-mechanism implementation (it's just the
//! password bytes) and a `GSSAPI` adapter that defers to an
//! injectable [`GssapiBackend`] — we do not bundle a Kerberos
//! implementation, and refuse to silently downgrade to an unauthenticated
//! bind when none is configured.

use anyhow::{bail, Result};

use crate::secret::SecretString;

/// One exchange step of a SASL negotiation.
pub trait SaslMechanism {
    fn mechanism_name(&self) -> &'static str;
    /// Respond to a server challenge. For mechanisms that complete in one
    /// round trip (like `SIMPLE`), `challenge` is ignored.
    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// SASL-simple: the secret (the settings password) sent as-is, per
/// `spec.md` §3's "SASL-simple mechanism, and the password becomes the
/// SASL secret".
pub struct SimpleSasl {
    secret: SecretString,
}

impl SimpleSasl {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

impl SaslMechanism for SimpleSasl {
    fn mechanism_name(&self) -> &'static str {
        "SIMPLE"
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Ok(self.secret.as_bytes().to_vec())
    }
}

/// Pluggable backend for the actual GSSAPI/Kerberos exchange. A real
/// deployment wires this to a system Kerberos library; this crate does
/// not provide one.
pub trait GssapiBackend {
    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

pub struct GssapiSasl {
    backend: Option<Box<dyn GssapiBackend>>,
}

impl GssapiSasl {
    pub fn new(backend: Option<Box<dyn GssapiBackend>>) -> Self {
        Self { backend }
    }
}

impl SaslMechanism for GssapiSasl {
    fn mechanism_name(&self) -> &'static str {
        "GSSAPI"
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        match &mut self.backend {
            Some(backend) => backend.step(challenge),
            None => bail!(
                "GSSAPI selected but no GssapiBackend is configured; \
                 refusing to fall back to an unauthenticated bind"
            ),
        }
    }
}
