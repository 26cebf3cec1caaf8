//! Configuration context: the derived, state-machine-facing presentation
//! of a `Settings` record (`spec.md` §3/§4.2 step 3). Built once at
//! `Session::init` time and never mutated afterward.

use std::path::PathBuf;

use crate::secret::SecretString;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    /// Unauthenticated bind with empty DN and empty credentials
    /// (`spec.md`'s "Anonymous bind" glossary entry).
    Anonymous,
    Simple,
    Interactive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslFlags {
    Quiet,
}

/// SASL-specific options, populated only when `Settings::use_sasl` is set.
#[derive(Clone, Debug)]
pub struct SaslOptions {
    /// "GSSAPI" or "SIMPLE" — see `Settings::sasl_mechanism`.
    pub mechanism: &'static str,
    pub secret: SecretString,
    pub nocanon: bool,
    pub secprops: &'static str,
    pub flags: SaslFlags,
}

/// TLS material paths. An empty/absent path means "fall back to the
/// platform's default trust store" (`spec.md` §8 boundary behavior).
#[derive(Clone, Debug, Default)]
pub struct TlsPaths {
    pub cacertfile: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
}

/// Derived presentation of `Settings` consumed by the connection state
/// machine and the `DirectoryProtocol` collaborator.
#[derive(Clone, Debug)]
pub struct ConfigContext {
    pub server_uri: String,
    pub protocol_version: u32,
    pub bind_kind: BindKind,
    /// Always `false` — referral chasing is explicitly disabled
    /// (`spec.md` §1 Non-goals).
    pub chase_referrals: bool,
    pub sasl: Option<SaslOptions>,
    pub tls: Option<TlsPaths>,
}

impl ConfigContext {
    pub fn from_settings(settings: &Settings) -> Self {
        let scheme = if settings.use_tls { "ldaps" } else { "ldap" };
        let server_uri = format!("{scheme}://{}", settings.host());

        // `use_anon` wins over `simple_bind` whenever SASL isn't in play:
        // `spec.md`'s "use_anon and not use_sasl -> unauthenticated simple
        // bind with empty credentials" takes precedence over sending the
        // derived (and, with no username, malformed) bind DN.
        let bind_kind = if settings.use_sasl {
            BindKind::Interactive
        } else if settings.use_anon {
            BindKind::Anonymous
        } else if settings.simple_bind {
            BindKind::Simple
        } else {
            BindKind::Interactive
        };

        let sasl = if settings.use_sasl {
            let mechanism: &'static str = if settings.simple_bind {
                "SIMPLE"
            } else {
                "GSSAPI"
            };
            let secret = settings
                .password
                .clone()
                .unwrap_or_else(|| SecretString::new(""));
            Some(SaslOptions {
                mechanism,
                secret,
                nocanon: true,
                secprops: "minssf=56",
                flags: SaslFlags::Quiet,
            })
        } else {
            None
        };

        let tls = if settings.use_tls {
            Some(TlsPaths {
                cacertfile: settings.cacertfile.clone(),
                certfile: settings.certfile.clone(),
                keyfile: settings.keyfile.clone(),
            })
        } else {
            None
        };

        ConfigContext {
            server_uri,
            protocol_version: settings.protocol_version,
            bind_kind,
            chase_referrals: false,
            sasl,
            tls,
        }
    }
}
