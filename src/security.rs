//! Credential storage and lookup.
//!
//! The servient keeps a [`CredentialStore`] keyed by href prefixes. When a protocol client is
//! created, it receives a [`CredentialsProvider`]: a snapshot of the store together with the
//! Thing's active security schemes. Bindings ask the provider for the credentials matching a
//! form at request time; the engine itself never injects secret material into requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConsumeError, ConsumeResult};
use crate::thing::{Form, KnownSecuritySchemeSubtype, SecuritySchemeSubtype, Thing};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BearerCredentials {
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiKeyCredentials {
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PskCredentials {
    pub identity: String,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct OAuth2Credentials {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub token: Option<String>,
}

/// Concrete credential material, one variant per supported security scheme kind.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum Credentials {
    Basic(BasicCredentials),
    Bearer(BearerCredentials),
    ApiKey(ApiKeyCredentials),
    Digest(DigestCredentials),
    Psk(PskCredentials),
    OAuth2(OAuth2Credentials),
}

impl Credentials {
    /// The kind name used in mismatch diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Basic(_) => "BasicCredentials",
            Self::Bearer(_) => "BearerCredentials",
            Self::ApiKey(_) => "ApiKeyCredentials",
            Self::Digest(_) => "DigestCredentials",
            Self::Psk(_) => "PskCredentials",
            Self::OAuth2(_) => "OAuth2Credentials",
        }
    }

    /// Whether this credential satisfies the given security scheme.
    pub const fn satisfies(&self, scheme: &KnownSecuritySchemeSubtype) -> bool {
        matches!(
            (self, scheme),
            (Self::Basic(_), KnownSecuritySchemeSubtype::Basic(_))
                | (Self::Bearer(_), KnownSecuritySchemeSubtype::Bearer(_))
                | (Self::ApiKey(_), KnownSecuritySchemeSubtype::ApiKey(_))
                | (Self::Digest(_), KnownSecuritySchemeSubtype::Digest(_))
                | (Self::Psk(_), KnownSecuritySchemeSubtype::Psk(_))
                | (Self::OAuth2(_), KnownSecuritySchemeSubtype::OAuth2(_))
        )
    }
}

/// The credential kind name a scheme expects, `None` for `nosec`.
const fn expected_kind(scheme: &KnownSecuritySchemeSubtype) -> Option<&'static str> {
    match scheme {
        KnownSecuritySchemeSubtype::NoSec => None,
        KnownSecuritySchemeSubtype::Basic(_) => Some("BasicCredentials"),
        KnownSecuritySchemeSubtype::Bearer(_) => Some("BearerCredentials"),
        KnownSecuritySchemeSubtype::ApiKey(_) => Some("ApiKeyCredentials"),
        KnownSecuritySchemeSubtype::Digest(_) => Some("DigestCredentials"),
        KnownSecuritySchemeSubtype::Psk(_) => Some("PskCredentials"),
        KnownSecuritySchemeSubtype::OAuth2(_) => Some("OAuth2Credentials"),
    }
}

/// Credentials keyed by href prefix.
///
/// A `BTreeMap` keeps the keys ordered, which makes the longest-prefix tie-break (lexicographic
/// order of the keys) fall out of plain iteration.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    entries: BTreeMap<String, Credentials>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, href_prefix: impl Into<String>, credentials: Credentials) {
        self.entries.insert(href_prefix.into(), credentials);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry whose key is the longest prefix of `href`.
    ///
    /// Ties on prefix length go to the lexicographically smallest key, which is the first one
    /// iteration meets.
    fn longest_prefix(&self, href: &str) -> Option<&Credentials> {
        let mut best: Option<(usize, &Credentials)> = None;
        for (key, credentials) in &self.entries {
            if href.starts_with(key.as_str()) {
                match best {
                    Some((len, _)) if key.len() <= len => {}
                    _ => best = Some((key.len(), credentials)),
                }
            }
        }
        best.map(|(_, credentials)| credentials)
    }
}

/// Resolves the credentials a form needs, given one Thing's security constraints.
///
/// The provider is built when a protocol client is created and installed on it once; later
/// changes to the servient's store do not reach already-cached clients.
#[derive(Clone)]
pub struct CredentialsProvider {
    store: Arc<CredentialStore>,
    schemes: Vec<KnownSecuritySchemeSubtype>,
}

impl CredentialsProvider {
    /// Snapshot `store` against the active security schemes of `thing`.
    ///
    /// Only schemes listed in the Thing's `security` member count; `nosec` and unrecognized
    /// scheme extensions impose no credential requirement.
    pub fn for_thing(thing: &Thing, store: &CredentialStore) -> Self {
        let schemes = thing
            .active_security()
            .filter_map(|scheme| match &scheme.subtype {
                SecuritySchemeSubtype::Known(known) => Some(known.clone()),
                SecuritySchemeSubtype::Unknown(_) => None,
            })
            .filter(|known| !matches!(known, KnownSecuritySchemeSubtype::NoSec))
            .collect();

        Self {
            store: Arc::new(store.clone()),
            schemes,
        }
    }

    /// The credentials to use for `form`, or `None` for anonymous access.
    pub fn credentials_for(&self, form: &Form) -> ConsumeResult<Option<Credentials>> {
        let Some(first_scheme) = self.schemes.first() else {
            return Ok(None);
        };

        let Some(credentials) = self.store.longest_prefix(&form.href) else {
            return Err(ConsumeError::NoCredentialsFound {
                message: format!("no credentials stored for href {}", form.href),
            });
        };

        if self
            .schemes
            .iter()
            .any(|scheme| credentials.satisfies(scheme))
        {
            return Ok(Some(credentials.clone()));
        }

        let expected = expected_kind(first_scheme).unwrap_or("no credentials");
        Err(ConsumeError::NoCredentialsFound {
            message: format!("Expected {expected} but found {}", credentials.kind()),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::thing::SecurityScheme;

    fn basic_thing() -> Thing {
        let scheme = SecurityScheme {
            subtype: SecuritySchemeSubtype::Known(KnownSecuritySchemeSubtype::Basic(
                Default::default(),
            )),
            ..Default::default()
        };
        Thing {
            title: "Device".to_string(),
            security: vec!["basic_sc".to_string()],
            security_definitions: [("basic_sc".to_string(), scheme)].into_iter().collect(),
            ..Default::default()
        }
    }

    fn form(href: &str) -> Form {
        Form {
            href: href.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn prefix_match_resolves() {
        let mut store = CredentialStore::new();
        store.insert(
            "https://example.com/device1",
            Credentials::Basic(BasicCredentials {
                username: "u".to_string(),
                password: "p".to_string(),
            }),
        );

        let provider = CredentialsProvider::for_thing(&basic_thing(), &store);
        let credentials = provider
            .credentials_for(&form("https://example.com/device1/status"))
            .unwrap()
            .unwrap();
        assert_eq!(credentials.kind(), "BasicCredentials");
    }

    #[test]
    fn unknown_href_fails() {
        let mut store = CredentialStore::new();
        store.insert(
            "https://example.com/device1",
            Credentials::Basic(BasicCredentials {
                username: "u".to_string(),
                password: "p".to_string(),
            }),
        );

        let provider = CredentialsProvider::for_thing(&basic_thing(), &store);
        let err = provider
            .credentials_for(&form("https://unknown.com/x"))
            .unwrap_err();
        assert!(matches!(err, ConsumeError::NoCredentialsFound { .. }));
    }

    #[test]
    fn kind_mismatch_names_both_sides() {
        let mut store = CredentialStore::new();
        store.insert(
            "https://example.com/device1",
            Credentials::Bearer(BearerCredentials {
                token: "t".to_string(),
            }),
        );

        let provider = CredentialsProvider::for_thing(&basic_thing(), &store);
        let err = provider
            .credentials_for(&form("https://example.com/device1/status"))
            .unwrap_err();
        let ConsumeError::NoCredentialsFound { message } = err else {
            panic!("wrong error kind");
        };
        assert!(message.contains("Expected BasicCredentials but found BearerCredentials"));
    }

    #[test]
    fn nosec_thing_is_anonymous() {
        let thing = Thing {
            title: "Open".to_string(),
            security: vec!["nosec".to_string()],
            security_definitions: [("nosec".to_string(), SecurityScheme::default())]
                .into_iter()
                .collect(),
            ..Default::default()
        };

        let provider = CredentialsProvider::for_thing(&thing, &CredentialStore::new());
        assert!(provider.credentials_for(&form("http://x/y")).unwrap().is_none());
    }

    #[test]
    fn longest_prefix_wins_and_ties_break_lexicographically() {
        let mut store = CredentialStore::new();
        store.insert(
            "https://example.com/",
            Credentials::Bearer(BearerCredentials {
                token: "outer".to_string(),
            }),
        );
        store.insert(
            "https://example.com/device1",
            Credentials::Basic(BasicCredentials {
                username: "inner".to_string(),
                password: "p".to_string(),
            }),
        );

        let provider = CredentialsProvider::for_thing(&basic_thing(), &store);
        let credentials = provider
            .credentials_for(&form("https://example.com/device1/x"))
            .unwrap()
            .unwrap();
        let Credentials::Basic(basic) = credentials else {
            panic!("longest prefix should win");
        };
        assert_eq!(basic.username, "inner");
    }
}
