//! Shared access signatures: validity windows, signing and verification.
//!
//! Tokens are account-key HMAC-SHA256 signatures over a newline separated
//! string-to-sign, carried in a query string (`sv`, `ss`, `srt`, `sp`, `st`,
//! `se`, `sr`, `spr`, `sig`). The signed resource `sr` scopes a token to the
//! whole account (`a`), one container (`c`) or one blob (`b`).

use crate::models::sas::{
    SasConfiguration, SasFlagError, SasPermissions, SasResourceTypes, SasServices, SasToken,
};
use crate::services::{
    address::BlobLocation,
    backend::{BackendError, StorageBackend},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{collections::HashMap, fmt};
use thiserror::Error;
use url::{Url, form_urlencoded};

type HmacSha256 = Hmac<Sha256>;

pub const SAS_VERSION: &str = "2020-08-04";
const SAS_PROTOCOLS: &str = "https,http";
const SAS_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("account key is not base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("account key has an unusable length")]
    KeyLength,
}

/// Account name plus a MAC keyed with the account key.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account_name: String,
    keyed: HmacSha256,
}

impl fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

/// What a token grants access to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SasScope {
    Account,
    Container(String),
    Blob { container: String, key: String },
}

impl SasScope {
    fn signed_resource(&self) -> &'static str {
        match self {
            SasScope::Account => "a",
            SasScope::Container(_) => "c",
            SasScope::Blob { .. } => "b",
        }
    }

    fn canonical_resource(&self, account: &str) -> String {
        match self {
            SasScope::Account => String::new(),
            SasScope::Container(container) => format!("/blob/{}/{}", account, container),
            SasScope::Blob { container, key } => format!("/blob/{}/{}/{}", account, container, key),
        }
    }
}

/// Everything that goes into a signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SasParameters {
    pub scope: SasScope,
    pub permissions: SasPermissions,
    pub resource_types: SasResourceTypes,
    pub services: SasServices,
    pub starts_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SasVerificationError {
    #[error("missing `{0}` field")]
    MissingField(&'static str),
    #[error("malformed `{0}` field")]
    Malformed(&'static str),
    #[error(transparent)]
    Flag(#[from] SasFlagError),
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("token is not valid at this time")]
    OutsideValidity,
    #[error("token does not grant the required access")]
    InsufficientAccess,
}

impl SharedKeyCredential {
    /// Build a credential from a base64 account key.
    pub fn new(account_name: impl Into<String>, key_base64: &str) -> Result<Self, CredentialError> {
        let key = general_purpose::STANDARD.decode(key_base64)?;
        Ok(Self {
            account_name: account_name.into(),
            keyed: HmacSha256::new_from_slice(&key).map_err(|_| CredentialError::KeyLength)?,
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    fn mac(&self, parameters: &SasParameters) -> HmacSha256 {
        let string_to_sign = [
            self.account_name.as_str(),
            &parameters.permissions.to_signed_string(),
            &parameters.services.to_signed_string(),
            &parameters.resource_types.to_signed_string(),
            &parameters.starts_on.format(SAS_TIME_FORMAT).to_string(),
            &parameters.expires_on.format(SAS_TIME_FORMAT).to_string(),
            parameters.scope.signed_resource(),
            &parameters.scope.canonical_resource(&self.account_name),
            SAS_PROTOCOLS,
            SAS_VERSION,
            "",
        ]
        .join("\n");

        let mut mac = self.keyed.clone();
        mac.update(string_to_sign.as_bytes());
        mac
    }

    /// Sign the parameters and render the query string (without `?`).
    pub fn sign(&self, parameters: &SasParameters) -> String {
        let signature = general_purpose::STANDARD.encode(self.mac(parameters).finalize().into_bytes());

        form_urlencoded::Serializer::new(String::new())
            .append_pair("sv", SAS_VERSION)
            .append_pair("ss", &parameters.services.to_signed_string())
            .append_pair("srt", &parameters.resource_types.to_signed_string())
            .append_pair("sp", &parameters.permissions.to_signed_string())
            .append_pair("st", &parameters.starts_on.format(SAS_TIME_FORMAT).to_string())
            .append_pair("se", &parameters.expires_on.format(SAS_TIME_FORMAT).to_string())
            .append_pair("sr", parameters.scope.signed_resource())
            .append_pair("spr", SAS_PROTOCOLS)
            .append_pair("sig", &signature)
            .finish()
    }

    /// Check that `query` grants `required` on the blob at `target` at `now`.
    pub fn verify(
        &self,
        query: &str,
        target: &BlobLocation,
        required: SasPermissions,
        now: DateTime<Utc>,
    ) -> Result<(), SasVerificationError> {
        let fields: HashMap<String, String> =
            form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .into_owned()
                .collect();
        let field = |name: &'static str| {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or(SasVerificationError::MissingField(name))
        };

        if field("sv")? != SAS_VERSION {
            return Err(SasVerificationError::Malformed("sv"));
        }

        let scope = match field("sr")? {
            "a" => SasScope::Account,
            "c" => SasScope::Container(target.container.clone()),
            "b" => SasScope::Blob {
                container: target.container.clone(),
                key: target.key.clone(),
            },
            _ => return Err(SasVerificationError::Malformed("sr")),
        };

        let parameters = SasParameters {
            scope,
            permissions: SasPermissions::parse(field("sp")?)?,
            resource_types: SasResourceTypes::parse(field("srt")?)?,
            services: SasServices::parse(field("ss")?)?,
            starts_on: parse_time(field("st")?).ok_or(SasVerificationError::Malformed("st"))?,
            expires_on: parse_time(field("se")?).ok_or(SasVerificationError::Malformed("se"))?,
        };

        let signature = general_purpose::STANDARD
            .decode(field("sig")?)
            .map_err(|_| SasVerificationError::Malformed("sig"))?;
        self.mac(&parameters)
            .verify_slice(&signature)
            .map_err(|_| SasVerificationError::InvalidSignature)?;

        if now < parameters.starts_on || now > parameters.expires_on {
            return Err(SasVerificationError::OutsideValidity);
        }
        if !parameters.permissions.contains(required)
            || !parameters.services.contains(SasServices::BLOB)
            || !parameters.resource_types.contains(SasResourceTypes::OBJECT)
        {
            return Err(SasVerificationError::InsufficientAccess);
        }
        Ok(())
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Error)]
pub enum SasIssueError {
    #[error("invalid SAS configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error(transparent)]
    Signing(#[from] BackendError),
}

/// Computes validity windows and issues signed query strings.
#[derive(Clone, Debug)]
pub struct AccessTokenIssuer {
    credential: SharedKeyCredential,
}

impl AccessTokenIssuer {
    pub fn new(credential: SharedKeyCredential) -> Self {
        Self { credential }
    }

    /// `[now - valid_from, now + valid_for + clock_skew]` widened to whole
    /// seconds.
    pub fn validity_window(
        configuration: &SasConfiguration,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), SasIssueError> {
        if configuration.valid_from_in_minutes == 0 {
            return Err(SasIssueError::InvalidConfiguration(
                "validFromInMinutes must be positive",
            ));
        }
        let starts_on = (now - Duration::minutes(i64::from(configuration.valid_from_in_minutes)))
            .trunc_subsecs(0);
        let expires_on = now
            + Duration::minutes(
                i64::from(configuration.valid_for_in_minutes)
                    + i64::from(configuration.clock_skew_in_minutes),
            );
        // Round up so the token never ends before the requested instant.
        let truncated = expires_on.trunc_subsecs(0);
        let expires_on = if truncated < expires_on {
            truncated + Duration::seconds(1)
        } else {
            truncated
        };
        Ok((starts_on, expires_on))
    }

    /// Sign a token for `scope`, returning it bound to `uri`.
    pub fn issue(
        &self,
        backend: &dyn StorageBackend,
        configuration: &SasConfiguration,
        scope: SasScope,
        permissions: SasPermissions,
        resource_types: SasResourceTypes,
        services: SasServices,
        uri: Url,
    ) -> Result<SasToken, SasIssueError> {
        let (starts_on, expires_on) = Self::validity_window(configuration, Utc::now())?;
        let parameters = SasParameters {
            scope,
            permissions,
            resource_types,
            services,
            starts_on,
            expires_on,
        };
        let query = backend.sign_query(&parameters, &self.credential)?;

        Ok(SasToken {
            uri,
            query: format!("?{}", query),
            starts_on,
            expires_on,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const KEY: &str = "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

    fn credential() -> SharedKeyCredential {
        SharedKeyCredential::new("devstoreaccount1", KEY).unwrap()
    }

    fn configuration(valid_from: u32) -> SasConfiguration {
        SasConfiguration {
            valid_from_in_minutes: valid_from,
            valid_for_in_minutes: 60,
            clock_skew_in_minutes: 5,
            container_name: "data".into(),
        }
    }

    fn location() -> BlobLocation {
        BlobLocation {
            container: "data".into(),
            key: "DEU/districts.json".into(),
        }
    }

    fn parameters(scope: SasScope) -> SasParameters {
        let (starts_on, expires_on) =
            AccessTokenIssuer::validity_window(&configuration(5), Utc::now()).unwrap();
        SasParameters {
            scope,
            permissions: SasPermissions::READ | SasPermissions::LIST,
            resource_types: SasResourceTypes::CONTAINER | SasResourceTypes::OBJECT,
            services: SasServices::BLOB,
            starts_on,
            expires_on,
        }
    }

    #[test]
    fn window_covers_now_plus_validity() {
        let now = Utc::now();
        let (start, end) = AccessTokenIssuer::validity_window(&configuration(5), now).unwrap();
        assert!(start <= now);
        assert!(end >= now + Duration::minutes(60));
        assert!(end - start >= Duration::minutes(65));
    }

    #[test]
    fn window_end_rounds_up_to_whole_seconds() {
        let mut configuration = configuration(5);
        configuration.clock_skew_in_minutes = 0;
        let now = Utc.with_ymd_and_hms(2020, 11, 2, 8, 30, 0).unwrap() + Duration::milliseconds(999);

        let (start, end) = AccessTokenIssuer::validity_window(&configuration, now).unwrap();
        assert!(end >= now + Duration::minutes(60));
        assert_eq!(end, Utc.with_ymd_and_hms(2020, 11, 2, 9, 30, 1).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2020, 11, 2, 8, 25, 0).unwrap());

        let exact = Utc.with_ymd_and_hms(2020, 11, 2, 8, 30, 0).unwrap();
        let (_, end) = AccessTokenIssuer::validity_window(&configuration, exact).unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2020, 11, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn window_rejects_non_positive_valid_from() {
        assert!(matches!(
            AccessTokenIssuer::validity_window(&configuration(0), Utc::now()),
            Err(SasIssueError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn signed_query_verifies_for_scoped_blob() {
        let cred = credential();
        let query = cred.sign(&parameters(SasScope::Container("data".into())));
        assert!(query.contains("sr=c"));
        assert!(query.contains("sp=rl"));
        assert_eq!(
            cred.verify(&query, &location(), SasPermissions::READ, Utc::now()),
            Ok(())
        );
    }

    #[test]
    fn verification_rejects_other_container_and_tampering() {
        let cred = credential();
        let query = cred.sign(&parameters(SasScope::Container("data".into())));
        let elsewhere = BlobLocation {
            container: "other".into(),
            key: "DEU/districts.json".into(),
        };
        assert_eq!(
            cred.verify(&query, &elsewhere, SasPermissions::READ, Utc::now()),
            Err(SasVerificationError::InvalidSignature)
        );

        let widened = query.replace("sp=rl", "sp=rwdl");
        assert_eq!(
            cred.verify(&widened, &location(), SasPermissions::READ, Utc::now()),
            Err(SasVerificationError::InvalidSignature)
        );
    }

    #[test]
    fn verification_checks_window_and_permissions() {
        let cred = credential();
        let query = cred.sign(&parameters(SasScope::Account));
        assert_eq!(
            cred.verify(
                &query,
                &location(),
                SasPermissions::READ,
                Utc::now() + Duration::hours(2)
            ),
            Err(SasVerificationError::OutsideValidity)
        );
        assert_eq!(
            cred.verify(&query, &location(), SasPermissions::WRITE, Utc::now()),
            Err(SasVerificationError::InsufficientAccess)
        );
    }

    #[test]
    fn debug_output_hides_key() {
        let rendered = format!("{:?}", credential());
        assert!(rendered.contains("devstoreaccount1"));
        assert!(!rendered.contains("Eby8"));
    }
}
