//! The synchronous operation façade from `spec.md` §4.6: `add_entry`,
//! `del_entry`, `mod_entry`, `rename_entry`, `mod_entry_attrs`. Every one
//! shares the same shape — validate, compose a DN, pick an opcode, call
//! through to the protocol collaborator, and collapse the result to
//! [`OpResult`] — so the bodies below are thin wrappers around
//! [`run_operation`].

use log::trace;

use crate::connection::{Connection, ConnectionState};
use crate::dn;
use crate::error::{log_failure, OpResult};
use crate::protocol::{DirectoryProtocol, ModOp, ProtocolMod};

/// One `(name, values[])` pair from the caller, before an opcode is
/// attached (`spec.md` §3's attribute modification list).
#[derive(Debug, Clone)]
pub struct AttributeModification {
    pub name: String,
    pub values: Vec<String>,
}

impl AttributeModification {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self { name: name.into(), values }
    }

    fn into_protocol_mod(self, op: ModOp) -> ProtocolMod {
        ProtocolMod { op, name: self.name, values: self.values }
    }
}

/// Marks the lifetime of one operation call. The per-call resources in
/// this crate are ordinary stack-owned `Vec`/`String` values with no
/// separate arena to release, but the guard still gives every operation
/// a single entry/exit log pair, mirroring the per-call arena the spec
/// requires to be released on every exit path.
struct OperationScope(&'static str);

impl OperationScope {
    fn enter(name: &'static str) -> Self {
        trace!("{name}: operation scope entered");
        Self(name)
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        trace!("{}: operation scope released", self.0);
    }
}

fn require_nonempty(label: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        Err(format!("required argument '{label}' must not be empty"))
    } else {
        Ok(())
    }
}

/// Validate the session, run `body`, and fold any failure through the
/// connection's installed error callback and the logger.
fn run_operation<P, F>(
    conn: Option<&mut Connection<P>>,
    op_name: &'static str,
    validate: impl FnOnce() -> Result<(), String>,
    body: F,
) -> OpResult
where
    P: DirectoryProtocol,
    F: FnOnce(&mut Connection<P>) -> anyhow::Result<()>,
{
    let _scope = OperationScope::enter(op_name);

    let Some(conn) = conn else {
        return log_failure(op_name, &anyhow::anyhow!("operation called with no session"));
    };

    if let Err(msg) = validate() {
        return log_failure(op_name, &anyhow::anyhow!(msg));
    }

    if conn.state() != ConnectionState::Run {
        let err = anyhow::anyhow!("connection is not in Run state ({:?})", conn.state());
        conn.notify_error(&err);
        return log_failure(op_name, &err);
    }

    match body(conn) {
        Ok(()) => OpResult::Success,
        Err(err) => {
            conn.notify_error(&err);
            log_failure(op_name, &err)
        }
    }
}

/// `add_entry(name, parent, prefix, attrs)` — composes
/// `<prefix>=<name>,<parent>` and issues an ADD with every attribute
/// carrying opcode ADD.
pub fn add_entry<P: DirectoryProtocol>(
    conn: Option<&mut Connection<P>>,
    name: &str,
    parent: &str,
    prefix: &str,
    attrs: Vec<AttributeModification>,
) -> OpResult {
    run_operation(
        conn,
        "add_entry",
        || {
            require_nonempty("name", name)?;
            require_nonempty("parent", parent)
        },
        |conn| {
            let target_dn = dn::compose_dn(prefix, name, parent);
            let mods: Vec<ProtocolMod> = attrs.into_iter().map(|a| a.into_protocol_mod(ModOp::Add)).collect();
            conn.protocol_mut().add(&target_dn, &mods)
        },
    )
}

/// `del_entry(name, parent, prefix)` — composes `<prefix>=<name>,<parent>`
/// and issues a DELETE.
pub fn del_entry<P: DirectoryProtocol>(
    conn: Option<&mut Connection<P>>,
    name: &str,
    parent: &str,
    prefix: &str,
) -> OpResult {
    run_operation(
        conn,
        "del_entry",
        || {
            require_nonempty("name", name)?;
            require_nonempty("parent", parent)
        },
        |conn| {
            let target_dn = dn::compose_dn(prefix, name, parent);
            conn.protocol_mut().delete(&target_dn)
        },
    )
}

/// `mod_entry(name, parent, prefix, attrs)` — composes
/// `<prefix>=<name>,<parent>` and issues a MODIFY with every attribute
/// carrying opcode REPLACE.
pub fn mod_entry<P: DirectoryProtocol>(
    conn: Option<&mut Connection<P>>,
    name: &str,
    parent: &str,
    prefix: &str,
    attrs: Vec<AttributeModification>,
) -> OpResult {
    run_operation(
        conn,
        "mod_entry",
        || {
            require_nonempty("name", name)?;
            require_nonempty("parent", parent)
        },
        |conn| {
            let target_dn = dn::compose_dn(prefix, name, parent);
            let mods: Vec<ProtocolMod> =
                attrs.into_iter().map(|a| a.into_protocol_mod(ModOp::Replace)).collect();
            conn.protocol_mut().modify(&target_dn, &mods)
        },
    )
}

/// `rename_entry(old_name, new_name, parent, prefix)` — old DN
/// `<prefix>=<old_name>,<parent>`, new RDN `<prefix>=<new_name>`, the
/// entry moves under `parent` with the old RDN deleted.
pub fn rename_entry<P: DirectoryProtocol>(
    conn: Option<&mut Connection<P>>,
    old_name: &str,
    new_name: &str,
    parent: &str,
    prefix: &str,
) -> OpResult {
    run_operation(
        conn,
        "rename_entry",
        || {
            require_nonempty("old_name", old_name)?;
            require_nonempty("new_name", new_name)?;
            require_nonempty("parent", parent)
        },
        |conn| {
            let old_dn = dn::compose_dn(prefix, old_name, parent);
            let new_rdn = dn::compose_rdn(prefix, new_name);
            conn.protocol_mut().rename(&old_dn, &new_rdn, parent, true)
        },
    )
}

/// `mod_entry_attrs(name, parent, prefix, attrs, opcode)` — like
/// `mod_entry`, but the caller chooses the opcode instead of it always
/// being REPLACE.
pub fn mod_entry_attrs<P: DirectoryProtocol>(
    conn: Option<&mut Connection<P>>,
    name: &str,
    parent: &str,
    prefix: &str,
    attrs: Vec<AttributeModification>,
    opcode: ModOp,
) -> OpResult {
    run_operation(
        conn,
        "mod_entry_attrs",
        || {
            require_nonempty("name", name)?;
            require_nonempty("parent", parent)
        },
        |conn| {
            let target_dn = dn::compose_dn(prefix, name, parent);
            let mods: Vec<ProtocolMod> = attrs.into_iter().map(|a| a.into_protocol_mod(opcode)).collect();
            conn.protocol_mut().modify(&target_dn, &mods)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_context::ConfigContext;
    use crate::protocol::{BindRequest, ProtocolOption};
    use crate::settings::SettingsBuilder;
    use std::cell::RefCell;
    use std::task::Poll;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingProtocol {
        adds: RefCell<Vec<(String, Vec<ProtocolMod>)>>,
        deletes: RefCell<Vec<String>>,
        modifies: RefCell<Vec<(String, Vec<ProtocolMod>)>>,
        renames: RefCell<Vec<(String, String, String, bool)>>,
    }

    impl DirectoryProtocol for RecordingProtocol {
        fn configure(&mut self, _cfg: &ConfigContext, _timeout: Duration) -> anyhow::Result<()> {
            Ok(())
        }
        fn start_tls(&mut self, _tls: &crate::config_context::TlsPaths) -> anyhow::Result<Poll<()>> {
            Ok(Poll::Ready(()))
        }
        fn bind(&mut self, _request: &BindRequest) -> anyhow::Result<Poll<()>> {
            Ok(Poll::Ready(()))
        }
        fn add(&mut self, dn: &str, attrs: &[ProtocolMod]) -> anyhow::Result<()> {
            self.adds.borrow_mut().push((dn.to_string(), attrs.to_vec()));
            Ok(())
        }
        fn delete(&mut self, dn: &str) -> anyhow::Result<()> {
            self.deletes.borrow_mut().push(dn.to_string());
            Ok(())
        }
        fn modify(&mut self, dn: &str, attrs: &[ProtocolMod]) -> anyhow::Result<()> {
            self.modifies.borrow_mut().push((dn.to_string(), attrs.to_vec()));
            Ok(())
        }
        fn rename(&mut self, old_dn: &str, new_rdn: &str, new_parent: &str, delete_old_rdn: bool) -> anyhow::Result<()> {
            self.renames
                .borrow_mut()
                .push((old_dn.to_string(), new_rdn.to_string(), new_parent.to_string(), delete_old_rdn));
            Ok(())
        }
        fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn set_option(&mut self, _option: ProtocolOption, _value: i32) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn running_connection() -> Connection<RecordingProtocol> {
        let settings = SettingsBuilder::new()
            .host("dc1.example")
            .base_dn("dc=example,dc=com")
            .use_anon(true)
            .build()
            .unwrap();
        let mut conn = Connection::new(RecordingProtocol::default(), &settings, String::new());
        conn.next_state().unwrap(); // Init -> Bind
        conn.next_state().unwrap(); // Bind -> Run
        assert_eq!(conn.state(), ConnectionState::Run);
        conn
    }

    #[test]
    fn add_entry_composes_dn_and_uses_add_opcode() {
        let mut conn = running_connection();
        let attrs = vec![AttributeModification::new("objectClass", vec!["person".into()])];
        let result = add_entry(Some(&mut conn), "u1", "ou=people,dc=example,dc=com", "cn", attrs);
        assert_eq!(result, OpResult::Success);
        let adds = conn.protocol_mut().adds.borrow();
        assert_eq!(adds[0].0, "cn=u1,ou=people,dc=example,dc=com");
        assert_eq!(adds[0].1[0].op, ModOp::Add);
    }

    #[test]
    fn rename_entry_invokes_expected_shape() {
        let mut conn = running_connection();
        let result = rename_entry(Some(&mut conn), "u1", "u2", "ou=people,dc=example,dc=com", "cn");
        assert_eq!(result, OpResult::Success);
        let renames = conn.protocol_mut().renames.borrow();
        assert_eq!(
            renames[0],
            (
                "cn=u1,ou=people,dc=example,dc=com".to_string(),
                "cn=u2".to_string(),
                "ou=people,dc=example,dc=com".to_string(),
                true,
            )
        );
    }

    #[test]
    fn mod_entry_attrs_with_empty_prefix_has_no_equals() {
        let mut conn = running_connection();
        let attrs = vec![AttributeModification::new("mail", vec![])];
        let result = mod_entry_attrs(Some(&mut conn), "u1", "ou=people,dc=example,dc=com", "", attrs, ModOp::Delete);
        assert_eq!(result, OpResult::Success);
        let modifies = conn.protocol_mut().modifies.borrow();
        assert_eq!(modifies[0].0, "u1,ou=people,dc=example,dc=com");
        assert_eq!(modifies[0].1[0].op, ModOp::Delete);
    }

    #[test]
    fn null_session_fails_without_panicking() {
        let result: OpResult = add_entry(
            None::<&mut Connection<RecordingProtocol>>,
            "u1",
            "ou=people,dc=example,dc=com",
            "cn",
            vec![],
        );
        assert_eq!(result, OpResult::Failure);
    }

    #[test]
    fn empty_required_argument_fails_without_panicking() {
        let mut conn = running_connection();
        let result = del_entry(Some(&mut conn), "", "ou=people,dc=example,dc=com", "cn");
        assert_eq!(result, OpResult::Failure);
    }

    #[test]
    fn operation_before_run_state_fails() {
        let settings = SettingsBuilder::new()
            .host("dc1.example")
            .base_dn("dc=example,dc=com")
            .use_anon(true)
            .build()
            .unwrap();
        let mut conn = Connection::new(RecordingProtocol::default(), &settings, String::new());
        let result = del_entry(Some(&mut conn), "u1", "ou=people,dc=example,dc=com", "cn");
        assert_eq!(result, OpResult::Failure);
    }

    #[test]
    fn error_callback_is_invoked_on_operation_failure() {
        struct FailingProtocol;
        impl DirectoryProtocol for FailingProtocol {
            fn configure(&mut self, _cfg: &ConfigContext, _timeout: Duration) -> anyhow::Result<()> {
                Ok(())
            }
            fn start_tls(&mut self, _tls: &crate::config_context::TlsPaths) -> anyhow::Result<Poll<()>> {
                Ok(Poll::Ready(()))
            }
            fn bind(&mut self, _request: &BindRequest) -> anyhow::Result<Poll<()>> {
                Ok(Poll::Ready(()))
            }
            fn add(&mut self, _dn: &str, _attrs: &[ProtocolMod]) -> anyhow::Result<()> {
                Ok(())
            }
            fn delete(&mut self, _dn: &str) -> anyhow::Result<()> {
                anyhow::bail!("server refused the delete")
            }
            fn modify(&mut self, _dn: &str, _attrs: &[ProtocolMod]) -> anyhow::Result<()> {
                Ok(())
            }
            fn rename(&mut self, _old_dn: &str, _new_rdn: &str, _new_parent: &str, _delete_old_rdn: bool) -> anyhow::Result<()> {
                Ok(())
            }
            fn close(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
            fn set_option(&mut self, _option: ProtocolOption, _value: i32) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let settings = SettingsBuilder::new()
            .host("dc1.example")
            .base_dn("dc=example,dc=com")
            .use_anon(true)
            .build()
            .unwrap();
        let mut conn = Connection::new(FailingProtocol, &settings, String::new());
        conn.next_state().unwrap();
        conn.next_state().unwrap();

        let seen = std::rc::Rc::new(RefCell::new(None));
        let seen_clone = seen.clone();
        conn.install_error_handler(Box::new(move |err| {
            *seen_clone.borrow_mut() = Some(err.to_string());
        }));

        let result = del_entry(Some(&mut conn), "u1", "ou=people,dc=example,dc=com", "cn");
        assert_eq!(result, OpResult::Failure);
        assert!(seen.borrow().is_some());
    }
}
