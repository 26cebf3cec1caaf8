//! End-to-end scenarios driving a `Session<MockProtocol>` the way a real
//! caller would: `init`, `install_default_handlers`, `exec`, then the
//! entry operations. `MockProtocol` stands in for the wire so these run
//! with no network access.

use std::cell::RefCell;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;

use anyhow::{bail, Result};

use libdomain::{
    AttributeModification, BindRequest, ConnectionState, DirectoryProtocol, ModOp, OpResult,
    ProtocolMod, ProtocolOption, Session, SettingsBuilder,
};
use libdomain::config_context::{ConfigContext, TlsPaths};

#[derive(Default)]
struct Recorded {
    configured: bool,
    tls_started: bool,
    bound_as: Option<String>,
    adds: Vec<(String, Vec<ProtocolMod>)>,
    deletes: Vec<String>,
    modifies: Vec<(String, Vec<ProtocolMod>)>,
    renames: Vec<(String, String, String, bool)>,
}

#[derive(Clone, Default)]
struct MockProtocol {
    state: Rc<RefCell<Recorded>>,
    fail_bind: bool,
}

impl DirectoryProtocol for MockProtocol {
    fn configure(&mut self, _cfg: &ConfigContext, _timeout: Duration) -> Result<()> {
        self.state.borrow_mut().configured = true;
        Ok(())
    }

    fn start_tls(&mut self, _tls: &TlsPaths) -> Result<Poll<()>> {
        self.state.borrow_mut().tls_started = true;
        Ok(Poll::Ready(()))
    }

    fn bind(&mut self, request: &BindRequest) -> Result<Poll<()>> {
        if self.fail_bind {
            bail!("simulated bind failure");
        }
        let label = match request {
            BindRequest::Anonymous => "anonymous".to_string(),
            BindRequest::Simple { dn, .. } => format!("simple:{dn}"),
            BindRequest::Sasl { mechanism, .. } => format!("sasl:{mechanism}"),
        };
        self.state.borrow_mut().bound_as = Some(label);
        Ok(Poll::Ready(()))
    }

    fn add(&mut self, dn: &str, attrs: &[ProtocolMod]) -> Result<()> {
        self.state.borrow_mut().adds.push((dn.to_string(), attrs.to_vec()));
        Ok(())
    }

    fn delete(&mut self, dn: &str) -> Result<()> {
        self.state.borrow_mut().deletes.push(dn.to_string());
        Ok(())
    }

    fn modify(&mut self, dn: &str, attrs: &[ProtocolMod]) -> Result<()> {
        self.state.borrow_mut().modifies.push((dn.to_string(), attrs.to_vec()));
        Ok(())
    }

    fn rename(&mut self, old_dn: &str, new_rdn: &str, new_parent: &str, delete_old_rdn: bool) -> Result<()> {
        self.state
            .borrow_mut()
            .renames
            .push((old_dn.to_string(), new_rdn.to_string(), new_parent.to_string(), delete_old_rdn));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_option(&mut self, _option: ProtocolOption, _value: i32) -> Result<()> {
        Ok(())
    }
}

/// Drives the connection to `Run`/`Error` using the public tick handler
/// API. `MockProtocol` never blocks, so each of the (at most two) ticks
/// resolves immediately; the real cost is the default 1000ms interval
/// between them.
fn run_fast(session: &mut Session<MockProtocol>) {
    session.install_default_handlers();
    session.exec();
}

#[test]
fn scenario_tls_and_sasl_gssapi_reaches_run() {
    let settings = SettingsBuilder::new()
        .host("dc1.example")
        .port(636)
        .base_dn("dc=example,dc=com")
        .use_tls(true)
        .use_sasl(true)
        .username("admin")
        .password("s3cret")
        .build()
        .unwrap();

    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let protocol = MockProtocol { state: recorded.clone(), fail_bind: false };
    let mut session = Session::init(settings, protocol).unwrap();
    session.set_gssapi_backend(Box::new(EchoGssapi));
    run_fast(&mut session);

    assert_eq!(session.state(), ConnectionState::Run);
    let r = recorded.borrow();
    assert!(r.configured);
    assert!(r.tls_started);
    assert_eq!(r.bound_as.as_deref(), Some("sasl:GSSAPI"));
}

struct EchoGssapi;
impl libdomain::GssapiBackend for EchoGssapi {
    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        Ok(challenge.to_vec())
    }
}

#[test]
fn scenario_anonymous_simple_bind_skips_tls() {
    let settings = SettingsBuilder::new()
        .host("dc1.example")
        .base_dn("dc=example,dc=com")
        .simple_bind(true)
        .use_anon(true)
        .build()
        .unwrap();

    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let protocol = MockProtocol { state: recorded.clone(), fail_bind: false };
    let mut session = Session::init(settings, protocol).unwrap();
    run_fast(&mut session);

    assert_eq!(session.state(), ConnectionState::Run);
    let r = recorded.borrow();
    assert!(!r.tls_started);
    // use_anon wins over simple_bind: an empty-DN/empty-credentials
    // anonymous bind, not a Simple bind against a malformed derived DN.
    assert_eq!(r.bound_as.as_deref(), Some("anonymous"));
}

#[test]
fn scenario_bind_failure_leaves_session_out_of_run() {
    let settings = SettingsBuilder::new()
        .host("dc1.example")
        .base_dn("dc=example,dc=com")
        .simple_bind(true)
        .username("admin")
        .password("wrong")
        .build()
        .unwrap();

    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let protocol = MockProtocol { state: recorded.clone(), fail_bind: true };
    let mut session = Session::init(settings, protocol).unwrap();
    run_fast(&mut session);

    assert_eq!(session.state(), ConnectionState::Error);
}

#[test]
fn scenario_add_then_modify_then_delete_entry() {
    let settings = SettingsBuilder::new()
        .host("dc1.example")
        .base_dn("dc=example,dc=com")
        .simple_bind(true)
        .username("admin")
        .password("s3cret")
        .build()
        .unwrap();

    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let protocol = MockProtocol { state: recorded.clone(), fail_bind: false };
    let mut session = Session::init(settings, protocol).unwrap();
    run_fast(&mut session);
    assert_eq!(session.state(), ConnectionState::Run);

    let attrs = vec![AttributeModification::new("objectClass", vec!["person".into()])];
    let result = session.add_entry("u1", "ou=people,dc=example,dc=com", "cn", attrs);
    assert_eq!(result, OpResult::Success);

    let attrs = vec![AttributeModification::new("mail", vec!["u1@example.com".into()])];
    let result = session.mod_entry("u1", "ou=people,dc=example,dc=com", "cn", attrs);
    assert_eq!(result, OpResult::Success);

    let result = session.del_entry("u1", "ou=people,dc=example,dc=com", "cn");
    assert_eq!(result, OpResult::Success);

    let r = recorded.borrow();
    assert_eq!(r.adds.len(), 1);
    assert_eq!(r.adds[0].0, "cn=u1,ou=people,dc=example,dc=com");
    assert_eq!(r.modifies.len(), 1);
    assert_eq!(r.deletes, vec!["cn=u1,ou=people,dc=example,dc=com".to_string()]);
}

#[test]
fn scenario_rename_entry() {
    let settings = SettingsBuilder::new()
        .host("dc1.example")
        .base_dn("dc=example,dc=com")
        .simple_bind(true)
        .username("admin")
        .password("s3cret")
        .build()
        .unwrap();

    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let protocol = MockProtocol { state: recorded.clone(), fail_bind: false };
    let mut session = Session::init(settings, protocol).unwrap();
    run_fast(&mut session);

    let result = session.rename_entry("u1", "u2", "ou=people,dc=example,dc=com", "cn");
    assert_eq!(result, OpResult::Success);

    let r = recorded.borrow();
    assert_eq!(r.renames.len(), 1);
    assert_eq!(r.renames[0].0, "cn=u1,ou=people,dc=example,dc=com");
    assert_eq!(r.renames[0].1, "cn=u2");
}

#[test]
fn scenario_mod_entry_attrs_add_and_delete_with_empty_prefix() {
    let settings = SettingsBuilder::new()
        .host("dc1.example")
        .base_dn("dc=example,dc=com")
        .simple_bind(true)
        .username("admin")
        .password("s3cret")
        .build()
        .unwrap();

    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let protocol = MockProtocol { state: recorded.clone(), fail_bind: false };
    let mut session = Session::init(settings, protocol).unwrap();
    run_fast(&mut session);

    let attrs = vec![AttributeModification::new("telephoneNumber", vec!["555".into()])];
    let result = session.mod_entry_attrs("u1", "ou=people,dc=example,dc=com", "", attrs, ModOp::Add);
    assert_eq!(result, OpResult::Success);

    let r = recorded.borrow();
    assert_eq!(r.modifies.len(), 1);
    assert_eq!(r.modifies[0].0, "u1,ou=people,dc=example,dc=com");
}

#[test]
fn operations_before_run_state_fail_without_panicking() {
    let settings = SettingsBuilder::new()
        .host("dc1.example")
        .base_dn("dc=example,dc=com")
        .use_anon(true)
        .build()
        .unwrap();

    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let protocol = MockProtocol { state: recorded.clone(), fail_bind: false };
    let mut session = Session::init(settings, protocol).unwrap();
    // No install_default_handlers / exec: connection is still at Init.
    let result = session.del_entry("u1", "ou=people,dc=example,dc=com", "cn");
    assert_eq!(result, OpResult::Failure);
}
