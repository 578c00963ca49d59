//! Redis key layout.
//!
//! | Key                                 | Type   | Content                              |
//! | ----------------------------------- | ------ | ------------------------------------ |
//! | `{prefix}:login_fail:user:{id}`     | string | consecutive failures of a user       |
//! | `{prefix}:login_fail:ip:{address}`  | string | consecutive failures of an address   |
//! | `{prefix}:last_login:user:{id}`     | hash   | current and previous successful login|
//!
//! Addresses are taken verbatim after the `ip:` marker, so IPv6 colons are fine.

use tollgate_core::{FailureKey, KeyKind, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn failure_key(&self, key: &FailureKey) -> String {
        match key {
            FailureKey::User(id) => format!("{}:login_fail:user:{id}", self.prefix),
            FailureKey::Address(address) => format!("{}:login_fail:ip:{address}", self.prefix),
        }
    }

    pub fn last_login_key(&self, user_id: UserId) -> String {
        format!("{}:last_login:user:{user_id}", self.prefix)
    }

    /// `SCAN MATCH` pattern for every failure counter of a kind.
    pub fn failure_pattern(&self, kind: KeyKind) -> String {
        format!("{}:login_fail:{kind}:*", self.prefix)
    }

    /// `SCAN MATCH` patterns covering everything this layout owns.
    pub fn owned_patterns(&self) -> [String; 2] {
        [
            format!("{}:login_fail:*", self.prefix),
            format!("{}:last_login:*", self.prefix),
        ]
    }

    /// Turn a raw counter key back into a [`FailureKey`].
    pub fn parse_failure_key(&self, raw: &str) -> Option<FailureKey> {
        let rest = raw
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(":login_fail:")?;

        if let Some(id) = rest.strip_prefix("user:") {
            return id.parse::<UserId>().ok().map(FailureKey::user);
        }
        rest.strip_prefix("ip:")
            .filter(|address| !address.is_empty())
            .map(FailureKey::address)
    }
}
