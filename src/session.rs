//! # Identity Session
//!
//! Gives every visiting client a stable pseudonymous identity across
//! repeated scans without any login.
//!
//! The client is the store of record: the identifier lives in a long-lived
//! cookie and is reused verbatim when presented. A client that clears
//! cookies gets a fresh identity, which is why attribution also keys on
//! address + user agent. A crafted cookie can self-assign any identifier;
//! that is a known weakness of the cookie half of the dual-key design and
//! is deliberately not patched here.

use rand::{rngs::OsRng, RngCore};

/// Cookie name carried over from the original deployment so existing
/// clients keep their identity.
pub const SESSION_COOKIE: &str = "userSessionId";

const SESSION_ID_BYTES: usize = 16;

/// Instruction for the transport layer to issue a freshly minted identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub name: &'static str,
    pub value: String,
    pub max_age_secs: i64,
    pub secure: bool,
}

impl CookieDirective {
    /// Renders the `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut rendered = format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            self.name, self.value, self.max_age_secs
        );

        if self.secure {
            rendered.push_str("; Secure");
        }

        rendered
    }
}

/// Outcome of resolving a client's identity for one request.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub session_id: String,
    /// Present only when a new identifier was minted this request.
    pub issued: Option<CookieDirective>,
}

/// Issues and reuses per-client session identifiers. Holds no state beyond
/// the issuance policy.
pub struct IdentitySession {
    max_age_secs: i64,
    secure: bool,
}

impl IdentitySession {
    pub fn new(max_age_secs: i64, secure: bool) -> Self {
        Self {
            max_age_secs,
            secure,
        }
    }

    /// Reuses a presented cookie value verbatim, otherwise mints a fresh
    /// 128-bit identifier and marks it for issuance.
    pub fn resolve(&self, existing: Option<&str>) -> Resolution {
        match existing {
            Some(value) if !value.is_empty() => Resolution {
                session_id: value.to_string(),
                issued: None,
            },
            _ => {
                let session_id = mint_session_id();

                Resolution {
                    session_id: session_id.clone(),
                    issued: Some(CookieDirective {
                        name: SESSION_COOKIE,
                        value: session_id,
                        max_age_secs: self.max_age_secs,
                        secure: self.secure,
                    }),
                }
            }
        }
    }
}

fn mint_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);

    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::{IdentitySession, SESSION_COOKIE, SESSION_ID_BYTES};

    #[test]
    fn test_existing_cookie_reused_verbatim() {
        let sessions = IdentitySession::new(60, false);

        let resolution = sessions.resolve(Some("abc123"));

        assert_eq!(resolution.session_id, "abc123");
        assert!(resolution.issued.is_none());
    }

    #[test]
    fn test_minted_id_is_128_bit_hex() {
        let sessions = IdentitySession::new(60, false);

        let resolution = sessions.resolve(None);

        assert_eq!(resolution.session_id.len(), SESSION_ID_BYTES * 2);
        assert!(resolution
            .session_id
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn test_minted_ids_are_distinct() {
        let sessions = IdentitySession::new(60, false);

        let first = sessions.resolve(None).session_id;
        let second = sessions.resolve(None).session_id;

        assert_ne!(first, second);
    }

    #[test]
    fn test_empty_cookie_triggers_mint() {
        let sessions = IdentitySession::new(60, false);

        let resolution = sessions.resolve(Some(""));

        assert!(resolution.issued.is_some());
    }

    #[test]
    fn test_directive_rendering() {
        let sessions = IdentitySession::new(1209600, true);

        let directive = sessions.resolve(None).issued.unwrap();
        let rendered = directive.header_value();

        assert!(rendered.starts_with(&format!("{SESSION_COOKIE}=")));
        assert!(rendered.contains("Max-Age=1209600"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.ends_with("; Secure"));
    }

    #[test]
    fn test_directive_insecure_outside_production() {
        let sessions = IdentitySession::new(60, false);

        let directive = sessions.resolve(None).issued.unwrap();

        assert!(!directive.header_value().contains("Secure"));
    }
}
