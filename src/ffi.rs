#![cfg(feature = "ffi")]

//! C FFI for libdomain (a minimal stable ABI for embedding from C/Go/Python).
//!
//! Model:
//! - Opaque handles `LdSettings`/`LdSession` own a boxed `Settings` /
//!   `Session<LdapProtocol>`.
//! - Errors are returned as `int` (0=OK, -1=ERR) plus `out_err` (`char**`).
//! - Attribute lists cross the boundary as parallel `name`/`value` arrays
//!   of equal length `n_attrs` — one value per attribute, the common
//!   case for the provisioning callers this ABI targets.
//!
//! Safety:
//! - Every pointer argument is checked for NULL; out-pointers must be
//!   valid writable locations.
//! - Strings are NUL-terminated C strings, UTF-8 where possible.
//! - Memory for out-strings is allocated in Rust and freed by
//!   `ld_string_free`.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use libc::c_uint;

use crate::protocol::{LdapProtocol, ModOp};
use crate::session::Session;
use crate::settings::{load_config, Settings, SettingsBuilder};

// ---------- Opaque handles ----------

#[repr(C)]
pub struct LdSettings {
    inner: *mut Settings,
}

#[repr(C)]
pub struct LdSession {
    inner: *mut Session<LdapProtocol>,
}

impl LdSettings {
    fn from_box(b: Box<Settings>) -> *mut LdSettings {
        Box::into_raw(Box::new(LdSettings { inner: Box::into_raw(b) }))
    }
}

impl LdSession {
    fn from_box(b: Box<Session<LdapProtocol>>) -> *mut LdSession {
        Box::into_raw(Box::new(LdSession { inner: Box::into_raw(b) }))
    }
    unsafe fn as_mut_session<'a>(&self) -> Option<&'a mut Session<LdapProtocol>> {
        (self.inner as *mut Session<LdapProtocol>).as_mut()
    }
}

/// Null-checks `session` before dereferencing it, then the boxed handle
/// inside. Every entry point below goes through this rather than
/// dereferencing the raw pointer directly.
unsafe fn session_mut<'a>(session: *mut LdSession) -> Option<&'a mut Session<LdapProtocol>> {
    if session.is_null() {
        return None;
    }
    (&*session).as_mut_session()
}

// ---------- Helpers ----------

unsafe fn cstr_to_string(c: *const c_char) -> Result<String, String> {
    if c.is_null() {
        return Err("null string argument".into());
    }
    CStr::from_ptr(c).to_str().map(str::to_string).map_err(|_| "argument is not valid UTF-8".to_string())
}

unsafe fn cstr_to_opt_string(c: *const c_char) -> Result<Option<String>, String> {
    if c.is_null() {
        Ok(None)
    } else {
        cstr_to_string(c).map(Some)
    }
}

unsafe fn set_err(out_err: *mut *mut c_char, msg: &str) {
    if out_err.is_null() {
        return;
    }
    if !(*out_err).is_null() {
        let _ = CString::from_raw(*out_err);
    }
    let c = CString::new(msg).unwrap_or_else(|_| CString::new("error").unwrap());
    *out_err = c.into_raw();
}

#[inline]
fn ret_ok() -> c_int {
    0
}
#[inline]
fn ret_err() -> c_int {
    -1
}

unsafe fn attrs_from_arrays(
    names: *const *const c_char,
    values: *const *const c_char,
    n_attrs: c_uint,
) -> Result<Vec<crate::operations::AttributeModification>, String> {
    if n_attrs == 0 {
        return Ok(Vec::new());
    }
    if names.is_null() || values.is_null() {
        return Err("attribute arrays must not be null when n_attrs > 0".into());
    }
    let mut out = Vec::with_capacity(n_attrs as usize);
    for i in 0..n_attrs as isize {
        let name = cstr_to_string(*names.offset(i))?;
        let value = cstr_to_string(*values.offset(i))?;
        out.push(crate::operations::AttributeModification::new(name, vec![value]));
    }
    Ok(out)
}

fn modop_from_c(code: c_int) -> ModOp {
    match code {
        0 => ModOp::Add,
        1 => ModOp::Delete,
        2 => ModOp::Replace,
        other => ModOp::Other(other),
    }
}

// ---------- Configuration ----------

#[no_mangle]
pub unsafe extern "C" fn ld_load_config(
    path: *const c_char,
    out_settings: *mut *mut LdSettings,
    out_err: *mut *mut c_char,
) -> c_int {
    if out_settings.is_null() {
        set_err(out_err, "out_settings is null");
        return ret_err();
    }
    *out_settings = ptr::null_mut();

    let path = match cstr_to_string(path) {
        Ok(p) => p,
        Err(e) => {
            set_err(out_err, &e);
            return ret_err();
        }
    };
    match load_config(&path) {
        Ok(settings) => {
            *out_settings = LdSettings::from_box(Box::new(settings));
            ret_ok()
        }
        Err(e) => {
            set_err(out_err, &format!("{e:#}"));
            ret_err()
        }
    }
}

/// Build a settings record directly from C-supplied fields, the FFI
/// counterpart of `SettingsBuilder`. Boolean flags are `0`/non-zero.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ld_create_config(
    host: *const c_char,
    port: c_int,
    base_dn: *const c_char,
    username: *const c_char,
    password: *const c_char,
    simple_bind: c_int,
    use_tls: c_int,
    use_sasl: c_int,
    use_anon: c_int,
    timeout_secs: c_uint,
    cacertfile: *const c_char,
    certfile: *const c_char,
    keyfile: *const c_char,
    out_settings: *mut *mut LdSettings,
    out_err: *mut *mut c_char,
) -> c_int {
    if out_settings.is_null() {
        set_err(out_err, "out_settings is null");
        return ret_err();
    }
    *out_settings = ptr::null_mut();

    let result = (|| -> Result<Settings, String> {
        let host = cstr_to_string(host)?;
        let base_dn = cstr_to_string(base_dn)?;
        let mut builder = SettingsBuilder::new()
            .host(host)
            .port(port as i64)
            .base_dn(base_dn)
            .simple_bind(simple_bind != 0)
            .use_tls(use_tls != 0)
            .use_sasl(use_sasl != 0)
            .use_anon(use_anon != 0)
            .timeout_secs(timeout_secs as u64);
        if let Some(u) = cstr_to_opt_string(username)? {
            builder = builder.username(u);
        }
        if let Some(p) = cstr_to_opt_string(password)? {
            builder = builder.password(p);
        }
        if let Some(p) = cstr_to_opt_string(cacertfile)? {
            builder = builder.cacertfile(p);
        }
        if let Some(p) = cstr_to_opt_string(certfile)? {
            builder = builder.certfile(p);
        }
        if let Some(p) = cstr_to_opt_string(keyfile)? {
            builder = builder.keyfile(p);
        }
        builder.build().map_err(|e| format!("{e:#}"))
    })();

    match result {
        Ok(settings) => {
            *out_settings = LdSettings::from_box(Box::new(settings));
            ret_ok()
        }
        Err(e) => {
            set_err(out_err, &e);
            ret_err()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn ld_settings_free(settings: *mut LdSettings) {
    if settings.is_null() {
        return;
    }
    let h: Box<LdSettings> = Box::from_raw(settings);
    if !h.inner.is_null() {
        drop(Box::from_raw(h.inner));
    }
}

// ---------- Session lifecycle ----------

/// Takes ownership of `settings`: on either outcome the `LdSettings`
/// handle is consumed and must not be used again.
#[no_mangle]
pub unsafe extern "C" fn ld_init(
    settings: *mut LdSettings,
    out_session: *mut *mut LdSession,
    out_err: *mut *mut c_char,
) -> c_int {
    if out_session.is_null() {
        set_err(out_err, "out_session is null");
        return ret_err();
    }
    *out_session = ptr::null_mut();

    if settings.is_null() {
        set_err(out_err, "settings is null");
        return ret_err();
    }
    let settings_box: Box<LdSettings> = Box::from_raw(settings);
    if settings_box.inner.is_null() {
        set_err(out_err, "settings handle already consumed");
        return ret_err();
    }
    let settings: Box<Settings> = Box::from_raw(settings_box.inner);

    match Session::init(*settings, LdapProtocol::new()) {
        Ok(session) => {
            *out_session = LdSession::from_box(Box::new(session));
            ret_ok()
        }
        Err(e) => {
            set_err(out_err, &format!("{e:#}"));
            ret_err()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn ld_install_default_handlers(session: *mut LdSession) {
    if let Some(s) = session_mut(session) {
        s.install_default_handlers();
    }
}

/// Caller-supplied error callback: `userdata` is passed back verbatim,
/// `msg` is valid only for the duration of the call.
pub type LdErrorCallback = extern "C" fn(msg: *const c_char, userdata: *mut c_void);

struct ErrorCallbackThunk {
    callback: LdErrorCallback,
    userdata: usize,
}

// Single-threaded, cooperatively scheduled usage only (spec's
// concurrency model): the raw userdata pointer never crosses a real
// thread boundary in this crate.
unsafe impl Send for ErrorCallbackThunk {}

impl ErrorCallbackThunk {
    fn invoke(&mut self, err: &anyhow::Error) {
        if let Ok(msg) = CString::new(format!("{err:#}")) {
            (self.callback)(msg.as_ptr(), self.userdata as *mut c_void);
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn ld_install_error_handler(
    session: *mut LdSession,
    callback: LdErrorCallback,
    userdata: *mut c_void,
) {
    if let Some(s) = session_mut(session) {
        let mut thunk = ErrorCallbackThunk { callback, userdata: userdata as usize };
        s.install_error_handler(Box::new(move |err| thunk.invoke(err)));
    }
}

#[no_mangle]
pub unsafe extern "C" fn ld_exec(session: *mut LdSession) {
    if let Some(s) = session_mut(session) {
        s.exec();
    }
}

/// Returns `1` while the loop still has work pending, `0` once every
/// handler has deregistered itself.
#[no_mangle]
pub unsafe extern "C" fn ld_exec_once(session: *mut LdSession) -> c_int {
    match session_mut(session) {
        Some(s) => {
            if s.exec_once() {
                1
            } else {
                0
            }
        }
        None => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn ld_free(session: *mut LdSession) {
    if session.is_null() {
        return;
    }
    let h: Box<LdSession> = Box::from_raw(session);
    if !h.inner.is_null() {
        let session: Box<Session<LdapProtocol>> = Box::from_raw(h.inner);
        session.free();
    }
}

// ---------- Entry operations ----------

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ld_add_entry(
    session: *mut LdSession,
    name: *const c_char,
    parent: *const c_char,
    prefix: *const c_char,
    attr_names: *const *const c_char,
    attr_values: *const *const c_char,
    n_attrs: c_uint,
    out_err: *mut *mut c_char,
) -> c_int {
    let Some(s) = session_mut(session) else {
        set_err(out_err, "session is null");
        return ret_err();
    };
    let (name, parent, prefix) = match (cstr_to_string(name), cstr_to_string(parent), cstr_to_string(prefix)) {
        (Ok(n), Ok(p), Ok(pre)) => (n, p, pre),
        _ => {
            set_err(out_err, "name/parent/prefix must be non-null valid UTF-8");
            return ret_err();
        }
    };
    let attrs = match attrs_from_arrays(attr_names, attr_values, n_attrs) {
        Ok(a) => a,
        Err(e) => {
            set_err(out_err, &e);
            return ret_err();
        }
    };
    if s.add_entry(&name, &parent, &prefix, attrs).is_success() {
        ret_ok()
    } else {
        set_err(out_err, "add_entry failed");
        ret_err()
    }
}

#[no_mangle]
pub unsafe extern "C" fn ld_del_entry(
    session: *mut LdSession,
    name: *const c_char,
    parent: *const c_char,
    prefix: *const c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    let Some(s) = session_mut(session) else {
        set_err(out_err, "session is null");
        return ret_err();
    };
    let (name, parent, prefix) = match (cstr_to_string(name), cstr_to_string(parent), cstr_to_string(prefix)) {
        (Ok(n), Ok(p), Ok(pre)) => (n, p, pre),
        _ => {
            set_err(out_err, "name/parent/prefix must be non-null valid UTF-8");
            return ret_err();
        }
    };
    if s.del_entry(&name, &parent, &prefix).is_success() {
        ret_ok()
    } else {
        set_err(out_err, "del_entry failed");
        ret_err()
    }
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ld_mod_entry(
    session: *mut LdSession,
    name: *const c_char,
    parent: *const c_char,
    prefix: *const c_char,
    attr_names: *const *const c_char,
    attr_values: *const *const c_char,
    n_attrs: c_uint,
    out_err: *mut *mut c_char,
) -> c_int {
    let Some(s) = session_mut(session) else {
        set_err(out_err, "session is null");
        return ret_err();
    };
    let (name, parent, prefix) = match (cstr_to_string(name), cstr_to_string(parent), cstr_to_string(prefix)) {
        (Ok(n), Ok(p), Ok(pre)) => (n, p, pre),
        _ => {
            set_err(out_err, "name/parent/prefix must be non-null valid UTF-8");
            return ret_err();
        }
    };
    let attrs = match attrs_from_arrays(attr_names, attr_values, n_attrs) {
        Ok(a) => a,
        Err(e) => {
            set_err(out_err, &e);
            return ret_err();
        }
    };
    if s.mod_entry(&name, &parent, &prefix, attrs).is_success() {
        ret_ok()
    } else {
        set_err(out_err, "mod_entry failed");
        ret_err()
    }
}

#[no_mangle]
pub unsafe extern "C" fn ld_rename_entry(
    session: *mut LdSession,
    old_name: *const c_char,
    new_name: *const c_char,
    parent: *const c_char,
    prefix: *const c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    let Some(s) = session_mut(session) else {
        set_err(out_err, "session is null");
        return ret_err();
    };
    let strings = (
        cstr_to_string(old_name),
        cstr_to_string(new_name),
        cstr_to_string(parent),
        cstr_to_string(prefix),
    );
    let (old_name, new_name, parent, prefix) = match strings {
        (Ok(a), Ok(b), Ok(c), Ok(d)) => (a, b, c, d),
        _ => {
            set_err(out_err, "old_name/new_name/parent/prefix must be non-null valid UTF-8");
            return ret_err();
        }
    };
    if s.rename_entry(&old_name, &new_name, &parent, &prefix).is_success() {
        ret_ok()
    } else {
        set_err(out_err, "rename_entry failed");
        ret_err()
    }
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ld_mod_entry_attrs(
    session: *mut LdSession,
    name: *const c_char,
    parent: *const c_char,
    prefix: *const c_char,
    attr_names: *const *const c_char,
    attr_values: *const *const c_char,
    n_attrs: c_uint,
    opcode: c_int,
    out_err: *mut *mut c_char,
) -> c_int {
    let Some(s) = session_mut(session) else {
        set_err(out_err, "session is null");
        return ret_err();
    };
    let (name, parent, prefix) = match (cstr_to_string(name), cstr_to_string(parent), cstr_to_string(prefix)) {
        (Ok(n), Ok(p), Ok(pre)) => (n, p, pre),
        _ => {
            set_err(out_err, "name/parent/prefix must be non-null valid UTF-8");
            return ret_err();
        }
    };
    let attrs = match attrs_from_arrays(attr_names, attr_values, n_attrs) {
        Ok(a) => a,
        Err(e) => {
            set_err(out_err, &e);
            return ret_err();
        }
    };
    if s.mod_entry_attrs(&name, &parent, &prefix, attrs, modop_from_c(opcode)).is_success() {
        ret_ok()
    } else {
        set_err(out_err, "mod_entry_attrs failed");
        ret_err()
    }
}

// ---------- Misc ----------

#[no_mangle]
pub unsafe extern "C" fn ld_string_free(s: *mut c_char) {
    if !s.is_null() {
        let _ = CString::from_raw(s);
    }
}

#[no_mangle]
pub extern "C" fn ld_version() -> *const c_char {
    static S: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    S.as_ptr() as *const c_char
}
