//! The session handle: the aggregate root from `spec.md` §4.2/§4.7.
//! Owns the settings record, the connection (behind a shared `RefCell`
//! so the default tick handler can reach it from inside the event
//! loop), and the event loop itself.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use log::info;

use crate::connection::{Connection, ConnectionState};
use crate::dn;
use crate::error::OpResult;
use crate::event_loop::{EventLoop, TickHandler, TimeoutId, DEFAULT_TICK_INTERVAL};
use crate::operations::{self, AttributeModification};
use crate::protocol::{DirectoryProtocol, ModOp, ProtocolOption};
use crate::sasl::GssapiBackend;
use crate::settings::Settings;

struct DefaultTick<P: DirectoryProtocol + 'static> {
    connection: Rc<RefCell<Connection<P>>>,
}

impl<P: DirectoryProtocol + 'static> TickHandler for DefaultTick<P> {
    fn on_tick(&mut self) -> Result<bool> {
        let state = self.connection.borrow_mut().next_state()?;
        Ok(!matches!(state, ConnectionState::Run | ConnectionState::Error))
    }
}

/// Aggregate root: `init` primes the connection at `Init`;
/// `install_default_handlers` (or `install_handler`) arms the event
/// loop; `exec`/`exec_once` pump it; dropping the session tears the
/// connection down.
pub struct Session<P: DirectoryProtocol + 'static> {
    settings: Settings,
    connection: Rc<RefCell<Connection<P>>>,
    event_loop: EventLoop,
    tick_id: Option<TimeoutId>,
}

impl<P: DirectoryProtocol + 'static> Session<P> {
    /// Step 1-7 of `spec.md` §4.2, short of actually connecting: the
    /// transport is primed lazily on the first `next_state` tick rather
    /// than inline here, so `init` itself cannot block on I/O.
    pub fn init(settings: Settings, protocol: P) -> Result<Self> {
        let bind_dn = dn::bind_dn(settings.username.as_deref().unwrap_or(""), &settings.base_dn);
        let mut connection = Connection::new(protocol, &settings, bind_dn);
        connection
            .protocol_mut()
            .set_option(ProtocolOption::DebugLevel, -1)?;
        info!("session initialized for {}", settings.host());
        Ok(Self {
            settings,
            connection: Rc::new(RefCell::new(connection)),
            event_loop: EventLoop::new(),
            tick_id: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.borrow().state()
    }

    /// Inject a GSSAPI backend for use by a pending SASL `GSSAPI` bind.
    pub fn set_gssapi_backend(&mut self, backend: Box<dyn GssapiBackend>) {
        self.connection.borrow_mut().set_gssapi_backend(backend);
    }

    /// Arms the default 1000ms tick that drives `next_state` and
    /// deregisters itself once `Run` or `Error` is reached.
    pub fn install_default_handlers(&mut self) {
        self.install_handler(DEFAULT_TICK_INTERVAL, Box::new(DefaultTick { connection: self.connection.clone() }));
    }

    /// Replace whatever tick handler is currently installed with a
    /// caller-supplied one on a caller-chosen interval.
    pub fn install_handler(&mut self, interval: Duration, handler: Box<dyn TickHandler>) {
        if let Some(id) = self.tick_id.take() {
            self.event_loop.del(id);
        }
        self.tick_id = Some(self.event_loop.add_timeout(interval, handler));
    }

    pub fn install_error_handler(&mut self, handler: Box<dyn FnMut(&anyhow::Error)>) {
        self.connection.borrow_mut().install_error_handler(handler);
    }

    /// Run the event loop until every registered handler has removed
    /// itself.
    pub fn exec(&mut self) {
        self.event_loop.run();
    }

    /// Pump exactly one round; may block on the registered interval or
    /// on wire I/O.
    pub fn exec_once(&mut self) -> bool {
        self.event_loop.run_once()
    }

    pub fn add_entry(&mut self, name: &str, parent: &str, prefix: &str, attrs: Vec<AttributeModification>) -> OpResult {
        let mut conn = self.connection.borrow_mut();
        operations::add_entry(Some(&mut *conn), name, parent, prefix, attrs)
    }

    pub fn del_entry(&mut self, name: &str, parent: &str, prefix: &str) -> OpResult {
        let mut conn = self.connection.borrow_mut();
        operations::del_entry(Some(&mut *conn), name, parent, prefix)
    }

    pub fn mod_entry(&mut self, name: &str, parent: &str, prefix: &str, attrs: Vec<AttributeModification>) -> OpResult {
        let mut conn = self.connection.borrow_mut();
        operations::mod_entry(Some(&mut *conn), name, parent, prefix, attrs)
    }

    pub fn rename_entry(&mut self, old_name: &str, new_name: &str, parent: &str, prefix: &str) -> OpResult {
        let mut conn = self.connection.borrow_mut();
        operations::rename_entry(Some(&mut *conn), old_name, new_name, parent, prefix)
    }

    pub fn mod_entry_attrs(
        &mut self,
        name: &str,
        parent: &str,
        prefix: &str,
        attrs: Vec<AttributeModification>,
        opcode: ModOp,
    ) -> OpResult {
        let mut conn = self.connection.borrow_mut();
        operations::mod_entry_attrs(Some(&mut *conn), name, parent, prefix, attrs, opcode)
    }

    /// Close the connection and drop every derived record. Consuming
    /// `self` is the idiomatic stand-in for "return without action when
    /// given null, otherwise release everything": there is no
    /// moved-from session left to double-free.
    pub fn free(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_context::ConfigContext;
    use crate::protocol::{BindRequest, ProtocolMod};
    use crate::settings::SettingsBuilder;
    use std::task::Poll;

    #[derive(Default)]
    struct StubProtocol;

    impl DirectoryProtocol for StubProtocol {
        fn configure(&mut self, _cfg: &ConfigContext, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        fn start_tls(&mut self, _tls: &crate::config_context::TlsPaths) -> Result<Poll<()>> {
            Ok(Poll::Ready(()))
        }
        fn bind(&mut self, _request: &BindRequest) -> Result<Poll<()>> {
            Ok(Poll::Ready(()))
        }
        fn add(&mut self, _dn: &str, _attrs: &[ProtocolMod]) -> Result<()> {
            Ok(())
        }
        fn delete(&mut self, _dn: &str) -> Result<()> {
            Ok(())
        }
        fn modify(&mut self, _dn: &str, _attrs: &[ProtocolMod]) -> Result<()> {
            Ok(())
        }
        fn rename(&mut self, _old_dn: &str, _new_rdn: &str, _new_parent: &str, _delete_old_rdn: bool) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_option(&mut self, _option: ProtocolOption, _value: i32) -> Result<()> {
            Ok(())
        }
    }

    fn settings() -> Settings {
        SettingsBuilder::new()
            .host("dc1.example")
            .base_dn("dc=example,dc=com")
            .use_anon(true)
            .build()
            .unwrap()
    }

    fn run_fast(session: &mut Session<StubProtocol>) {
        // Drives the same `DefaultTick` logic as `install_default_handlers`
        // but on a sub-millisecond cadence so the test doesn't pay the
        // real 1000ms default interval per transition.
        session.install_handler(
            Duration::from_millis(1),
            Box::new(DefaultTick { connection: session.connection.clone() }),
        );
        session.exec();
    }

    #[test]
    fn install_default_handlers_drives_to_run() {
        let mut session = Session::init(settings(), StubProtocol).unwrap();
        run_fast(&mut session);
        assert_eq!(session.state(), ConnectionState::Run);
    }

    #[test]
    fn operations_before_run_state_fail() {
        let mut session = Session::init(settings(), StubProtocol).unwrap();
        let result = session.del_entry("u1", "ou=people,dc=example,dc=com", "cn");
        assert_eq!(result, OpResult::Failure);
    }

    #[test]
    fn operations_succeed_once_running() {
        let mut session = Session::init(settings(), StubProtocol).unwrap();
        run_fast(&mut session);
        let attrs = vec![AttributeModification::new("objectClass", vec!["person".into()])];
        let result = session.add_entry("u1", "ou=people,dc=example,dc=com", "cn", attrs);
        assert_eq!(result, OpResult::Success);
    }

    #[test]
    fn free_consumes_session() {
        let session = Session::init(settings(), StubProtocol).unwrap();
        session.free();
    }
}
