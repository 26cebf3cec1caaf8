//! Distinguished-name composition shared by the bind pipeline and the
//! operation surface. See `spec.md` §4.6 for the exact rules.

/// `cn=<username>,<base_dn>` — the bind DN derived from settings.
pub fn bind_dn(username: &str, base_dn: &str) -> String {
    format!("cn={username},{base_dn}")
}

/// `<prefix>=<name>,<parent>`, or just `<name>,<parent>` when `prefix` is
/// empty (the `mod_entry_attrs` special case).
pub fn compose_dn(prefix: &str, name: &str, parent: &str) -> String {
    if prefix.is_empty() {
        format!("{name},{parent}")
    } else {
        format!("{prefix}={name},{parent}")
    }
}

/// Just the RDN component, `<prefix>=<name>` — used by `rename_entry`.
pub fn compose_rdn(prefix: &str, name: &str) -> String {
    format!("{prefix}={name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_dn_is_cn_plus_base() {
        assert_eq!(
            bind_dn("admin", "dc=example,dc=com"),
            "cn=admin,dc=example,dc=com"
        );
    }

    #[test]
    fn compose_dn_with_prefix() {
        assert_eq!(
            compose_dn("cn", "u1", "ou=people,dc=example,dc=com"),
            "cn=u1,ou=people,dc=example,dc=com"
        );
    }

    #[test]
    fn compose_dn_empty_prefix_has_no_equals() {
        assert_eq!(
            compose_dn("", "u1", "ou=people,dc=example,dc=com"),
            "u1,ou=people,dc=example,dc=com"
        );
    }

    #[test]
    fn compose_rdn_basic() {
        assert_eq!(compose_rdn("cn", "u2"), "cn=u2");
    }
}
