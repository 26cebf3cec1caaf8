//! The directory-protocol collaborator: the trait the connection state
//! machine drives, and a default implementation that actually speaks
//! LDAP over a `TcpStream` (optionally upgraded with `native-tls`).
//!
//! `spec.md` §1 treats the wire protocol itself as an external
//! collaborator — the state machine only needs something shaped like
//! [`DirectoryProtocol`]. [`LdapProtocol`] is one concrete realization of
//! that shape, built on the minimal [`crate::ber`] codec rather than on
//! an unverifiable external BER crate.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::task::Poll;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use native_tls::TlsConnector;

use crate::ber::{self, Element};
use crate::config_context::{ConfigContext, TlsPaths};
use crate::secret::SecretString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Replace,
    Delete,
    Other(i32),
}

/// One attribute change, as described in `spec.md` §4.6.
#[derive(Debug, Clone)]
pub struct ProtocolMod {
    pub op: ModOp,
    pub name: String,
    pub values: Vec<String>,
}

pub enum BindRequest<'a> {
    Anonymous,
    Simple {
        dn: &'a str,
        password: &'a SecretString,
    },
    Sasl {
        mechanism: &'static str,
        credentials: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolOption {
    DebugLevel,
}

/// Everything the connection state machine needs from the wire layer.
/// Every method that can be "in progress" returns `Poll<()>` rather than
/// pulling in an async runtime the rest of the crate doesn't use.
pub trait DirectoryProtocol {
    fn configure(&mut self, cfg: &ConfigContext, timeout: Duration) -> Result<()>;
    fn start_tls(&mut self, tls: &TlsPaths) -> Result<Poll<()>>;
    fn bind(&mut self, request: &BindRequest) -> Result<Poll<()>>;
    fn add(&mut self, dn: &str, attrs: &[ProtocolMod]) -> Result<()>;
    fn delete(&mut self, dn: &str) -> Result<()>;
    fn modify(&mut self, dn: &str, attrs: &[ProtocolMod]) -> Result<()>;
    fn rename(&mut self, old_dn: &str, new_rdn: &str, new_parent: &str, delete_old_rdn: bool) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn set_option(&mut self, option: ProtocolOption, value: i32) -> Result<()>;
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Transport {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.write_all(buf),
            Transport::Tls(s) => s.write_all(buf),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

/// Default `DirectoryProtocol`: plain or TLS-upgraded LDAP over TCP.
pub struct LdapProtocol {
    transport: Option<Transport>,
    message_id: i32,
    host: String,
    port: u16,
    protocol_version: u32,
}

impl Default for LdapProtocol {
    fn default() -> Self {
        Self {
            transport: None,
            message_id: 0,
            host: String::new(),
            port: 0,
            protocol_version: 3,
        }
    }
}

impl LdapProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_message_id(&mut self) -> i64 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id as i64
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or_else(|| anyhow!("directory protocol used before configure()"))
    }

    fn read_response_op(&mut self) -> Result<Element> {
        let transport = self.transport_mut()?;
        let outer = ber::read_element(transport).context("read LDAPMessage envelope")?;
        if outer.tag != ber::TAG_SEQUENCE {
            bail!("expected LDAPMessage SEQUENCE, got tag {:#x}", outer.tag);
        }
        let mut cursor = std::io::Cursor::new(outer.content);
        let _message_id = ber::read_element(&mut cursor).context("read LDAPMessage messageID")?;
        ber::read_element(&mut cursor).context("read LDAPMessage protocolOp")
    }

    fn send_and_check(&mut self, op: Vec<u8>, expected_tag: u8) -> Result<()> {
        let msg_id = ber::encode_integer(ber::TAG_INTEGER, self.next_message_id());
        let message = ber::encode_sequence(ber::TAG_SEQUENCE, &[msg_id, op]);
        self.transport_mut()?
            .write_all(&message)
            .context("write LDAP message")?;
        let response = self.read_response_op()?;
        if response.tag != expected_tag {
            bail!(
                "unexpected LDAP response tag {:#x}, expected {:#x}",
                response.tag,
                expected_tag
            );
        }
        let mut cursor = std::io::Cursor::new(&response.content);
        let code_elem = ber::read_element(&mut cursor).context("read LDAPResult resultCode")?;
        if code_elem.tag != ber::TAG_ENUMERATED {
            bail!("expected resultCode ENUMERATED, got tag {:#x}", code_elem.tag);
        }
        let code = ber::read_integer(&code_elem.content);
        if code != 0 {
            bail!("LDAP operation failed with result code {code}");
        }
        Ok(())
    }

    fn encode_attribute_list(attrs: &[ProtocolMod]) -> Vec<u8> {
        let mut content = Vec::new();
        for a in attrs {
            let type_elem = ber::tlv(ber::TAG_OCTET_STRING, a.name.as_bytes());
            let mut vals_content = Vec::new();
            for v in &a.values {
                vals_content.extend(ber::tlv(ber::TAG_OCTET_STRING, v.as_bytes()));
            }
            let vals_elem = ber::tlv(ber::TAG_SET, &vals_content);
            let mut pair = type_elem;
            pair.extend(vals_elem);
            content.extend(ber::tlv(ber::TAG_SEQUENCE, &pair));
        }
        ber::tlv(ber::TAG_SEQUENCE, &content)
    }

    fn encode_changes(attrs: &[ProtocolMod]) -> Vec<u8> {
        let mut content = Vec::new();
        for a in attrs {
            let op_code = match a.op {
                ModOp::Add => 0,
                ModOp::Delete => 1,
                ModOp::Replace => 2,
                ModOp::Other(n) => n as i64,
            };
            let op_elem = ber::encode_integer(ber::TAG_ENUMERATED, op_code);
            let type_elem = ber::tlv(ber::TAG_OCTET_STRING, a.name.as_bytes());
            let mut vals_content = Vec::new();
            for v in &a.values {
                vals_content.extend(ber::tlv(ber::TAG_OCTET_STRING, v.as_bytes()));
            }
            let vals_elem = ber::tlv(ber::TAG_SET, &vals_content);
            let mut modification = type_elem;
            modification.extend(vals_elem);
            let modification_elem = ber::tlv(ber::TAG_SEQUENCE, &modification);
            let mut change = op_elem;
            change.extend(modification_elem);
            content.extend(ber::tlv(ber::TAG_SEQUENCE, &change));
        }
        ber::tlv(ber::TAG_SEQUENCE, &content)
    }

    fn encode_bind_request(version: u32, name: &str, auth: Vec<u8>) -> Vec<u8> {
        let version_elem = ber::encode_integer(ber::TAG_INTEGER, version as i64);
        let name_elem = ber::tlv(ber::TAG_OCTET_STRING, name.as_bytes());
        let mut content = version_elem;
        content.extend(name_elem);
        content.extend(auth);
        ber::tlv(ber::APP_BIND_REQUEST, &content)
    }

    fn encode_sasl_auth(mechanism: &str, credentials: &[u8]) -> Vec<u8> {
        let mut content = ber::tlv(ber::TAG_OCTET_STRING, mechanism.as_bytes());
        if !credentials.is_empty() {
            content.extend(ber::tlv(ber::TAG_OCTET_STRING, credentials));
        }
        ber::tlv(ber::CTX_3_CONSTRUCTED, &content)
    }
}

impl DirectoryProtocol for LdapProtocol {
    fn configure(&mut self, cfg: &ConfigContext, timeout: Duration) -> Result<()> {
        self.protocol_version = cfg.protocol_version;
        let (scheme, rest) = cfg
            .server_uri
            .split_once("://")
            .ok_or_else(|| anyhow!("invalid server URI '{}'", cfg.server_uri))?;
        let default_port = if scheme == "ldaps" { 636 } else { 389 };
        let (host, port) = match rest.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse::<u16>().context("invalid port in server URI")?),
            None => (rest.to_string(), default_port),
        };
        let addr = format!("{host}:{port}");
        let mut addrs = addr.to_socket_addrs().with_context(|| format!("resolve {addr}"))?;
        let sockaddr = addrs.next().ok_or_else(|| anyhow!("no addresses resolved for {addr}"))?;
        let stream = TcpStream::connect_timeout(&sockaddr, timeout)
            .with_context(|| format!("connect to {addr}"))?;
        stream.set_read_timeout(Some(timeout)).ok();
        stream.set_write_timeout(Some(timeout)).ok();
        self.host = host;
        self.port = port;
        self.transport = Some(Transport::Plain(stream));
        debug!("directory protocol connected to {addr}");
        Ok(())
    }

    fn start_tls(&mut self, tls: &TlsPaths) -> Result<Poll<()>> {
        let plain = match self.transport.take() {
            Some(Transport::Plain(s)) => s,
            Some(other @ Transport::Tls(_)) => {
                self.transport = Some(other);
                return Ok(Poll::Ready(()));
            }
            None => bail!("start_tls called before configure()"),
        };

        let mut builder = TlsConnector::builder();
        if let Some(ca_path) = &tls.cacertfile {
            let pem_bytes = std::fs::read(ca_path)
                .with_context(|| format!("read CA certificate {}", ca_path.display()))?;
            pem::parse(&pem_bytes).context("parse CA certificate PEM")?;
            let cert = native_tls::Certificate::from_pem(&pem_bytes).context("decode CA certificate")?;
            builder.add_root_certificate(cert);
        }
        if let (Some(cert_path), Some(key_path)) = (&tls.certfile, &tls.keyfile) {
            let cert_pem = std::fs::read(cert_path)
                .with_context(|| format!("read client certificate {}", cert_path.display()))?;
            let key_pem = std::fs::read(key_path)
                .with_context(|| format!("read client key {}", key_path.display()))?;
            let identity = native_tls::Identity::from_pkcs8(&cert_pem, &key_pem)
                .context("build client TLS identity")?;
            builder.identity(identity);
        }
        let connector = builder.build().context("build TLS connector")?;
        let host = self.host.clone();
        let tls_stream = connector
            .connect(&host, plain)
            .map_err(|e| anyhow!("TLS handshake with {host} failed: {e}"))?;
        self.transport = Some(Transport::Tls(Box::new(tls_stream)));
        debug!("TLS transport upgrade to {host} complete");
        Ok(Poll::Ready(()))
    }

    fn bind(&mut self, request: &BindRequest) -> Result<Poll<()>> {
        let (name, auth_elem) = match request {
            BindRequest::Anonymous => (String::new(), ber::tlv(ber::CTX_0_PRIMITIVE, &[])),
            BindRequest::Simple { dn, password } => {
                (dn.to_string(), ber::tlv(ber::CTX_0_PRIMITIVE, password.as_bytes()))
            }
            BindRequest::Sasl { mechanism, credentials } => {
                (String::new(), Self::encode_sasl_auth(mechanism, credentials))
            }
        };
        let op = Self::encode_bind_request(self.protocol_version, &name, auth_elem);
        self.send_and_check(op, ber::APP_BIND_RESPONSE)?;
        Ok(Poll::Ready(()))
    }

    fn add(&mut self, dn: &str, attrs: &[ProtocolMod]) -> Result<()> {
        let entry_elem = ber::tlv(ber::TAG_OCTET_STRING, dn.as_bytes());
        let attrs_elem = Self::encode_attribute_list(attrs);
        let mut content = entry_elem;
        content.extend(attrs_elem);
        let op = ber::tlv(ber::APP_ADD_REQUEST, &content);
        self.send_and_check(op, ber::APP_ADD_RESPONSE)
    }

    fn delete(&mut self, dn: &str) -> Result<()> {
        let op = ber::tlv(ber::APP_DEL_REQUEST, dn.as_bytes());
        self.send_and_check(op, ber::APP_DEL_RESPONSE)
    }

    fn modify(&mut self, dn: &str, attrs: &[ProtocolMod]) -> Result<()> {
        let object_elem = ber::tlv(ber::TAG_OCTET_STRING, dn.as_bytes());
        let changes_elem = Self::encode_changes(attrs);
        let mut content = object_elem;
        content.extend(changes_elem);
        let op = ber::tlv(ber::APP_MODIFY_REQUEST, &content);
        self.send_and_check(op, ber::APP_MODIFY_RESPONSE)
    }

    fn rename(&mut self, old_dn: &str, new_rdn: &str, new_parent: &str, delete_old_rdn: bool) -> Result<()> {
        let entry_elem = ber::tlv(ber::TAG_OCTET_STRING, old_dn.as_bytes());
        let newrdn_elem = ber::tlv(ber::TAG_OCTET_STRING, new_rdn.as_bytes());
        let delete_elem = ber::tlv(ber::TAG_BOOLEAN, &[if delete_old_rdn { 0xFF } else { 0x00 }]);
        let new_superior_elem = ber::tlv(ber::CTX_0_PRIMITIVE, new_parent.as_bytes());
        let mut content = entry_elem;
        content.extend(newrdn_elem);
        content.extend(delete_elem);
        content.extend(new_superior_elem);
        let op = ber::tlv(ber::APP_MODDN_REQUEST, &content);
        self.send_and_check(op, ber::APP_MODDN_RESPONSE)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            let op = ber::tlv(ber::APP_UNBIND_REQUEST, &[]);
            let msg_id = ber::encode_integer(ber::TAG_INTEGER, self.next_message_id());
            let message = ber::encode_sequence(ber::TAG_SEQUENCE, &[msg_id, op]);
            // Best effort: the connection is going away regardless of
            // whether the unbind notification makes it onto the wire.
            let _ = transport.write_all(&message);
        }
        Ok(())
    }

    fn set_option(&mut self, option: ProtocolOption, value: i32) -> Result<()> {
        match option {
            ProtocolOption::DebugLevel => {
                debug!("directory protocol debug level set to {value}");
                Ok(())
            }
        }
    }
}

impl Drop for LdapProtocol {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
