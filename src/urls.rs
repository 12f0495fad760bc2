//! RESTBase resource URLs for invalidation requests.
use crate::model::{RevisionId, Title};
use once_cell::sync::Lazy;
use regex::Regex;

static SERVER_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?:)?(?://)?([^/:]+?)(?:/|:\d+/?)?$").expect("valid host regex")
});

/// Characters the wiki leaves unescaped in title URLs.
const UNESCAPED: &[(&str, &str)] = &[
    ("%3B", ";"),
    ("%40", "@"),
    ("%24", "$"),
    ("%21", "!"),
    ("%2A", "*"),
    ("%28", "("),
    ("%29", ")"),
    ("%2C", ","),
    ("%2F", "/"),
    ("%7E", "~"),
    ("%3A", ":"),
];

/// Immutable URL prefix `<server>/<domain>/<api version>`, built once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestbaseUrls {
    prefix: String,
}

impl RestbaseUrls {
    pub fn new(server: &str, domain: &str, api_version: &str) -> Self {
        let prefix = [
            server.trim_end_matches('/'),
            domain.trim_matches('/'),
            api_version.trim_matches('/'),
        ]
        .join("/");
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn revision_url(&self, revision: RevisionId) -> String {
        format!("{}/page/revision/{}", self.prefix, revision)
    }

    pub fn page_url(&self, title: &Title, revision: RevisionId) -> String {
        format!(
            "{}/page/html/{}/{}",
            self.prefix,
            encode_title(&title.prefixed_db_key()),
            revision
        )
    }
}

/// Percent-encode a prefixed DB key the way wiki page URLs are written.
pub fn encode_title(db_key: &str) -> String {
    let mut encoded = urlencoding::encode(db_key).into_owned();
    for (escaped, raw) in UNESCAPED {
        if encoded.contains(escaped) {
            encoded = encoded.replace(escaped, raw);
        }
    }
    encoded
}

/// Host part of the wiki's canonical server, used as the RESTBase domain
/// when none is configured.
pub fn derive_domain(canonical_server: &str) -> String {
    let trimmed = canonical_server.trim();
    SERVER_HOST
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}
