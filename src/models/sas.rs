//! Shared access signature configuration and flags.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Validity window and target of a shared access signature.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SasConfiguration {
    /// Minutes subtracted from now for the start time. Must be positive.
    #[serde(alias = "validUntilInMinutes")]
    pub valid_from_in_minutes: u32,

    pub valid_for_in_minutes: u32,

    /// Extra minutes added to the expiry to tolerate verifier clock drift.
    #[serde(alias = "clockScrewInMinutes")]
    pub clock_skew_in_minutes: u32,

    pub container_name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} flag `{flag}`")]
pub struct SasFlagError {
    pub kind: &'static str,
    pub flag: char,
}

bitflags! {
    /// Operations a token grants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SasPermissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const DELETE = 1 << 2;
        const LIST = 1 << 3;
        const ADD = 1 << 4;
        const CREATE = 1 << 5;
    }
}

bitflags! {
    /// Resource levels a token grants access to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SasResourceTypes: u8 {
        const SERVICE = 1 << 0;
        const CONTAINER = 1 << 1;
        const OBJECT = 1 << 2;
    }
}

bitflags! {
    /// Storage services a token is valid for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SasServices: u8 {
        const BLOB = 1 << 0;
        const QUEUE = 1 << 1;
        const TABLE = 1 << 2;
        const FILE = 1 << 3;
    }
}

const PERMISSION_CHARS: [(SasPermissions, char); 6] = [
    (SasPermissions::READ, 'r'),
    (SasPermissions::WRITE, 'w'),
    (SasPermissions::DELETE, 'd'),
    (SasPermissions::LIST, 'l'),
    (SasPermissions::ADD, 'a'),
    (SasPermissions::CREATE, 'c'),
];

const RESOURCE_TYPE_CHARS: [(SasResourceTypes, char); 3] = [
    (SasResourceTypes::SERVICE, 's'),
    (SasResourceTypes::CONTAINER, 'c'),
    (SasResourceTypes::OBJECT, 'o'),
];

const SERVICE_CHARS: [(SasServices, char); 4] = [
    (SasServices::BLOB, 'b'),
    (SasServices::QUEUE, 'q'),
    (SasServices::TABLE, 't'),
    (SasServices::FILE, 'f'),
];

macro_rules! signed_flags {
    ($ty:ty, $table:ident, $kind:literal) => {
        impl $ty {
            /// Canonical single-letter form used in signed query strings.
            pub fn to_signed_string(&self) -> String {
                $table
                    .iter()
                    .filter(|(flag, _)| self.contains(*flag))
                    .map(|(_, c)| *c)
                    .collect()
            }

            pub fn parse(value: &str) -> Result<Self, SasFlagError> {
                value.chars().try_fold(Self::empty(), |acc, c| {
                    $table
                        .iter()
                        .find(|(_, candidate)| *candidate == c)
                        .map(|(flag, _)| acc | *flag)
                        .ok_or(SasFlagError { kind: $kind, flag: c })
                })
            }
        }
    };
}

signed_flags!(SasPermissions, PERMISSION_CHARS, "permission");
signed_flags!(SasResourceTypes, RESOURCE_TYPE_CHARS, "resource type");
signed_flags!(SasServices, SERVICE_CHARS, "service");

/// An issued token: the resource it targets plus the signed query string.
#[derive(Serialize, Clone, Debug)]
pub struct SasToken {
    pub uri: Url,
    /// Query string including the leading `?`.
    pub query: String,
    pub starts_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

impl SasToken {
    /// The resource uri with the signature appended.
    pub fn signed_uri(&self) -> String {
        format!("{}{}", self.uri, self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_render_in_canonical_order() {
        let perms = SasPermissions::LIST | SasPermissions::READ | SasPermissions::WRITE;
        assert_eq!(perms.to_signed_string(), "rwl");
    }

    #[test]
    fn parse_accepts_any_order_and_rejects_unknown() {
        assert_eq!(
            SasResourceTypes::parse("oc").unwrap(),
            SasResourceTypes::CONTAINER | SasResourceTypes::OBJECT
        );
        assert_eq!(
            SasPermissions::parse("rx").unwrap_err(),
            SasFlagError {
                kind: "permission",
                flag: 'x'
            }
        );
    }

    #[test]
    fn configuration_accepts_legacy_field_names() {
        let cfg: SasConfiguration = serde_json::from_str(
            r#"{"validUntilInMinutes":5,"validForInMinutes":60,"clockScrewInMinutes":5,"containerName":"data"}"#,
        )
        .unwrap();
        assert_eq!(cfg.valid_from_in_minutes, 5);
        assert_eq!(cfg.clock_skew_in_minutes, 5);
        assert_eq!(cfg.container_name, "data");
    }
}
