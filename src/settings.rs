//! Settings record: the immutable session parameters an application binds
//! with (`spec.md` §3/§4.1). Two constructors produce a `Settings`: the
//! textual file loader (`load_config`) and the programmatic
//! `SettingsBuilder`; both funnel through `Settings::assemble`, which is
//! where every cross-field invariant is enforced exactly once.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::secret::SecretString;

/// Immutable session parameters. Produced by [`load_config`] or
/// [`SettingsBuilder`]; never mutated afterward.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Bare hostname, without the optional `:port` suffix (kept separately
    /// from the rendered `host()` presentation so a loaded settings record
    /// round-trips back through [`Settings::to_config_string`]).
    pub hostname: String,
    /// Non-positive means "omit from `host()`", matching `spec.md` §3/§8.
    pub port: i64,
    pub protocol_version: u32,
    pub base_dn: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub simple_bind: bool,
    pub use_tls: bool,
    pub use_sasl: bool,
    pub use_anon: bool,
    pub timeout: Duration,
    pub cacertfile: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
}

impl Settings {
    /// `host`, optionally suffixed `:port` — the attribute named in
    /// `spec.md` §3. Kept as a method rather than a stored field so the
    /// bare hostname and port survive independently for re-serialization.
    pub fn host(&self) -> String {
        if self.port > 0 {
            format!("{}:{}", self.hostname, self.port)
        } else {
            self.hostname.clone()
        }
    }

    /// The mechanism `config_context::ConfigContext` will select, per
    /// `spec.md` §3's invariant: GSSAPI unless `simple_bind` is also set,
    /// in which case the SASL-simple mechanism is used.
    pub fn sasl_mechanism(&self) -> &'static str {
        if self.simple_bind {
            "SIMPLE"
        } else {
            "GSSAPI"
        }
    }

    /// Render back into the same `key = value` text format `load_config`
    /// reads, over exactly the recognized key set (`spec.md` §8 round-trip
    /// invariant).
    pub fn to_config_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("host = {}\n", self.hostname));
        if self.port > 0 {
            out.push_str(&format!("port = {}\n", self.port));
        }
        out.push_str(&format!("protocol_version = {}\n", self.protocol_version));
        out.push_str(&format!("base_dn = {}\n", self.base_dn));
        if let Some(u) = &self.username {
            out.push_str(&format!("username = {u}\n"));
        }
        if let Some(p) = &self.password {
            out.push_str(&format!("password = {}\n", p.as_str()));
        }
        out.push_str(&format!("simple_bind = {}\n", self.simple_bind));
        out.push_str(&format!("use_tls = {}\n", self.use_tls));
        out.push_str(&format!("use_sasl = {}\n", self.use_sasl));
        out.push_str(&format!("use_anon = {}\n", self.use_anon));
        out.push_str(&format!("timeout = {}\n", self.timeout.as_secs()));
        if let Some(p) = &self.cacertfile {
            out.push_str(&format!("ca_cert_file = {}\n", p.display()));
        }
        if let Some(p) = &self.certfile {
            out.push_str(&format!("cert_file = {}\n", p.display()));
        }
        if let Some(p) = &self.keyfile {
            out.push_str(&format!("key_file = {}\n", p.display()));
        }
        out
    }

    /// Shared invariant gate used by both constructors: non-empty host and
    /// base_dn (`spec.md` §8), and — per this crate's resolution of the
    /// §9 open question — a username whenever a mechanism that needs one
    /// is selected and `use_anon` isn't set, rather than silently deriving
    /// a bind DN that embeds a missing username.
    fn assemble(raw: RawSettings) -> Result<Settings> {
        if raw.hostname.trim().is_empty() {
            bail!("'host' must not be empty");
        }
        if raw.base_dn.trim().is_empty() {
            bail!("'base_dn' must not be empty");
        }
        let needs_username = (raw.simple_bind || raw.use_sasl) && !raw.use_anon;
        if needs_username && raw.username.as_deref().unwrap_or("").is_empty() {
            bail!(
                "simple_bind/use_sasl requires a non-empty 'username' unless \
                 'use_anon' is set (a null username would otherwise produce \
                 an invalid bind DN)"
            );
        }
        Ok(Settings {
            hostname: raw.hostname,
            port: raw.port,
            protocol_version: raw.protocol_version,
            base_dn: raw.base_dn,
            username: raw.username,
            password: raw.password,
            simple_bind: raw.simple_bind,
            use_tls: raw.use_tls,
            use_sasl: raw.use_sasl,
            use_anon: raw.use_anon,
            timeout: Duration::from_secs(raw.timeout_secs.max(0) as u64),
            cacertfile: raw.cacertfile,
            certfile: raw.certfile,
            keyfile: raw.keyfile,
        })
    }
}

/// Pre-validation bag of fields, shared by the loader and the builder so
/// `Settings::assemble` is the single place invariants are checked.
struct RawSettings {
    hostname: String,
    port: i64,
    protocol_version: u32,
    base_dn: String,
    username: Option<String>,
    password: Option<SecretString>,
    simple_bind: bool,
    use_tls: bool,
    use_sasl: bool,
    use_anon: bool,
    timeout_secs: i64,
    cacertfile: Option<PathBuf>,
    certfile: Option<PathBuf>,
    keyfile: Option<PathBuf>,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: 0,
            protocol_version: 3,
            base_dn: String::new(),
            username: None,
            password: None,
            simple_bind: false,
            use_tls: false,
            use_sasl: false,
            use_anon: false,
            timeout_secs: 0,
            cacertfile: None,
            certfile: None,
            keyfile: None,
        }
    }
}

/// Load a settings record from a textual `key = value` configuration file.
/// Recognizes exactly the key set in `spec.md` §4.1; unknown keys are
/// ignored. Errors carry the file path and the offending line number,
/// mirroring `domain.c`'s `config_error_file`/`config_error_text`.
pub fn load_config(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    let map = parse_kv(&text, path)?;

    let mut raw = RawSettings::default();

    raw.hostname = map
        .get("host")
        .cloned()
        .with_context(|| format!("{}: missing required 'host' setting", path.display()))?;
    raw.base_dn = map
        .get("base_dn")
        .cloned()
        .with_context(|| format!("{}: missing required 'base_dn' setting", path.display()))?;

    raw.port = parse_int(&map, "port", 0, path)?;
    raw.protocol_version = parse_int(&map, "protocol_version", 3, path)? as u32;
    raw.timeout_secs = parse_int(&map, "timeout", 0, path)?;

    raw.username = nonempty(&map, "username");
    raw.password = nonempty(&map, "password").map(SecretString::new);
    raw.cacertfile = nonempty(&map, "ca_cert_file").map(PathBuf::from);
    raw.certfile = nonempty(&map, "cert_file").map(PathBuf::from);
    raw.keyfile = nonempty(&map, "key_file").map(PathBuf::from);

    raw.simple_bind = parse_bool(&map, "simple_bind", path)?;
    raw.use_tls = parse_bool(&map, "use_tls", path)?;
    raw.use_sasl = parse_bool(&map, "use_sasl", path)?;
    raw.use_anon = parse_bool(&map, "use_anon", path)?;

    Settings::assemble(raw).with_context(|| format!("{}: invalid configuration", path.display()))
}

fn parse_kv(text: &str, path: &Path) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let (key, value) = line.split_once('=').with_context(|| {
            format!(
                "{}:{}: expected 'key = value', got '{}'",
                path.display(),
                idx + 1,
                raw_line
            )
        })?;
        let key = key.trim().to_string();
        let mut value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }
        map.insert(key, value.to_string());
    }
    Ok(map)
}

fn nonempty(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key).filter(|v| !v.is_empty()).cloned()
}

fn parse_int(map: &HashMap<String, String>, key: &str, default: i64, path: &Path) -> Result<i64> {
    match map.get(key) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<i64>()
            .with_context(|| format!("{}: '{}' is not an integer: '{}'", path.display(), key, v)),
    }
}

fn parse_bool(map: &HashMap<String, String>, key: &str, path: &Path) -> Result<bool> {
    match map.get(key) {
        None => Ok(false),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => bail!("{}: '{}' is not a boolean: '{}'", path.display(), key, other),
        },
    }
}

/// Fluent, programmatic counterpart to [`load_config`] — the "programmatic
/// builder" of `spec.md` §4.1, styled after the teacher crate's
/// `DbBuilder`/`QuiverConfig` builder pair.
#[derive(Default)]
pub struct SettingsBuilder {
    raw: RawSettings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, hostname: impl Into<String>) -> Self {
        self.raw.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: i64) -> Self {
        self.raw.port = port;
        self
    }

    pub fn protocol_version(mut self, version: u32) -> Self {
        self.raw.protocol_version = version;
        self
    }

    pub fn base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.raw.base_dn = base_dn.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.raw.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.raw.password = Some(SecretString::new(password.into()));
        self
    }

    pub fn simple_bind(mut self, on: bool) -> Self {
        self.raw.simple_bind = on;
        self
    }

    pub fn use_tls(mut self, on: bool) -> Self {
        self.raw.use_tls = on;
        self
    }

    pub fn use_sasl(mut self, on: bool) -> Self {
        self.raw.use_sasl = on;
        self
    }

    pub fn use_anon(mut self, on: bool) -> Self {
        self.raw.use_anon = on;
        self
    }

    pub fn timeout_secs(mut self, secs: i64) -> Self {
        self.raw.timeout_secs = secs;
        self
    }

    pub fn cacertfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw.cacertfile = Some(path.into());
        self
    }

    pub fn certfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw.certfile = Some(path.into());
        self
    }

    pub fn keyfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw.keyfile = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Settings> {
        Settings::assemble(self.raw)
    }
}
