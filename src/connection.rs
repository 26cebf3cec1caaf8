//! The connection lifecycle state machine described in `spec.md` §4.3:
//! `Init -> TlsStart -> Bind -> Run`, with `Error` reachable from any
//! state and terminal once entered.

use std::task::Poll;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use crate::config_context::{BindKind, ConfigContext};
use crate::protocol::{BindRequest, DirectoryProtocol};
use crate::sasl::{GssapiBackend, GssapiSasl, SaslMechanism, SimpleSasl};
use crate::secret::SecretString;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    TlsStart,
    Bind,
    Run,
    Error,
}

/// Drives a `DirectoryProtocol` through the connection lifecycle. Owns
/// no socket directly — that lives behind the `protocol` collaborator —
/// so `Connection` itself stays cheap to move and to hold behind the
/// owning session's `RefCell`.
pub struct Connection<P: DirectoryProtocol> {
    state: ConnectionState,
    protocol: P,
    cfg: ConfigContext,
    bind_dn: String,
    password: SecretString,
    gssapi_backend: Option<Box<dyn GssapiBackend>>,
    timeout: Duration,
    on_error: Option<Box<dyn FnMut(&anyhow::Error)>>,
}

impl<P: DirectoryProtocol> Connection<P> {
    pub fn new(protocol: P, settings: &Settings, bind_dn: String) -> Self {
        Self {
            state: ConnectionState::Init,
            protocol,
            cfg: ConfigContext::from_settings(settings),
            bind_dn,
            password: settings.password.clone().unwrap_or_default(),
            gssapi_backend: None,
            timeout: settings.timeout,
            on_error: None,
        }
    }

    /// Inject a GSSAPI backend before the connection reaches `Bind`.
    /// Without one, a GSSAPI bind request fails explicitly rather than
    /// falling back to an unauthenticated bind.
    pub fn set_gssapi_backend(&mut self, backend: Box<dyn GssapiBackend>) {
        self.gssapi_backend = Some(backend);
    }

    /// Install the callback invoked by the operation surface whenever a
    /// request against this connection fails (`spec.md` §4.4).
    pub fn install_error_handler(&mut self, handler: Box<dyn FnMut(&anyhow::Error)>) {
        self.on_error = Some(handler);
    }

    pub fn notify_error(&mut self, err: &anyhow::Error) {
        if let Some(handler) = &mut self.on_error {
            handler(err);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Advance the state machine by one non-blocking step. `Run` and
    /// `Error` are idempotent: calling `next_state` again does nothing.
    pub fn next_state(&mut self) -> Result<ConnectionState> {
        match self.state {
            ConnectionState::Init => {
                match self.protocol.configure(&self.cfg, self.timeout) {
                    Ok(()) => {
                        self.state = if self.cfg.tls.is_some() {
                            ConnectionState::TlsStart
                        } else {
                            ConnectionState::Bind
                        };
                        debug!("connection transport configured, advancing to {:?}", self.state);
                    }
                    Err(err) => self.fail("configure transport", err),
                }
            }
            ConnectionState::TlsStart => {
                let tls = self.cfg.tls.clone().expect("TlsStart state implies cfg.tls is set");
                match self.protocol.start_tls(&tls) {
                    Ok(Poll::Ready(())) => {
                        self.state = ConnectionState::Bind;
                        debug!("TLS handshake complete, advancing to Bind");
                    }
                    Ok(Poll::Pending) => {}
                    Err(err) => self.fail("start TLS", err),
                }
            }
            ConnectionState::Bind => {
                let result = self.do_bind();
                match result {
                    Ok(Poll::Ready(())) => {
                        self.state = ConnectionState::Run;
                        info!("bind complete, connection is Run");
                    }
                    Ok(Poll::Pending) => {}
                    Err(err) => self.fail("bind", err),
                }
            }
            ConnectionState::Run | ConnectionState::Error => {}
        }
        Ok(self.state)
    }

    fn do_bind(&mut self) -> Result<Poll<()>> {
        match self.cfg.bind_kind {
            BindKind::Anonymous => {
                let request = BindRequest::Anonymous;
                self.protocol.bind(&request)
            }
            BindKind::Simple => {
                let request = BindRequest::Simple { dn: &self.bind_dn, password: &self.password };
                self.protocol.bind(&request)
            }
            BindKind::Interactive => {
                let Some(sasl_opts) = self.cfg.sasl.clone() else {
                    let request = BindRequest::Anonymous;
                    return self.protocol.bind(&request);
                };
                let mut mechanism: Box<dyn SaslMechanism> = if sasl_opts.mechanism == "SIMPLE" {
                    Box::new(SimpleSasl::new(sasl_opts.secret.clone()))
                } else {
                    Box::new(GssapiSasl::new(self.gssapi_backend.take()))
                };
                let credentials = mechanism
                    .step(&[])
                    .context("compute initial SASL response")?;
                let request = BindRequest::Sasl { mechanism: sasl_opts.mechanism, credentials };
                self.protocol.bind(&request)
            }
        }
    }

    fn fail(&mut self, what: &str, err: anyhow::Error) {
        error!("connection failed during {what}: {err:#}");
        self.state = ConnectionState::Error;
    }

    /// Tear down the underlying protocol handle. Safe to call from any
    /// state, including `Error`, so a failed TLS or bind step still
    /// releases its socket.
    pub fn close(&mut self) -> Result<()> {
        self.protocol.close()
    }
}

impl<P: DirectoryProtocol> Drop for Connection<P> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("error closing connection during drop: {err:#}");
        }
    }
}
