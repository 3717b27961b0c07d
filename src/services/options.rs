//! Storage account and repository options.

use crate::services::{
    address::{EndpointError, ServiceEndpoint},
    sas::{CredentialError, SharedKeyCredential},
};
use clap::ValueEnum;
use std::fmt;
use thiserror::Error;

/// Public storage emulator account.
pub const EMULATOR_ACCOUNT_NAME: &str = "devstoreaccount1";
/// Well-known emulator key, published with the emulator itself.
pub const EMULATOR_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
pub const EMULATOR_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("no storage account name configured")]
    MissingAccountName,
    #[error("no storage account key configured")]
    MissingAccountKey,
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Connection capability injected into a repository.
pub trait StorageOptions: Send + Sync + fmt::Debug {
    fn account_name(&self) -> Result<String, OptionsError>;

    /// Blob service endpoint of the account.
    fn endpoint(&self) -> Result<ServiceEndpoint, OptionsError>;

    /// Shared key used to sign access tokens.
    fn credential(&self) -> Result<SharedKeyCredential, OptionsError>;
}

/// Sovereign cloud the account lives in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CloudInstance {
    #[default]
    Public,
    China,
    Germany,
    UsGovernment,
}

impl CloudInstance {
    pub fn endpoint_suffix(self) -> &'static str {
        match self {
            CloudInstance::Public => "core.windows.net",
            CloudInstance::China => "core.chinacloudapi.cn",
            CloudInstance::Germany => "core.cloudapi.de",
            CloudInstance::UsGovernment => "core.usgovcloudapi.net",
        }
    }
}

/// Account settings from a connection string and/or explicit values.
///
/// Explicit values win over connection string parts. Development storage
/// replaces everything with the emulator account.
#[derive(Clone, Default)]
pub struct StorageAccountOptions {
    pub connection_string: Option<String>,
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub use_development_storage: bool,
    pub cloud_instance: CloudInstance,
    /// Overrides the endpoint derived from the account name.
    pub blob_endpoint: Option<String>,
}

impl fmt::Debug for StorageAccountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccountOptions")
            .field("account_name", &self.account_name)
            .field("use_development_storage", &self.use_development_storage)
            .field("cloud_instance", &self.cloud_instance)
            .field("blob_endpoint", &self.blob_endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ConnectionString {
    account_name: Option<String>,
    account_key: Option<String>,
    endpoint_suffix: Option<String>,
    blob_endpoint: Option<String>,
    protocol: Option<String>,
    development_storage: bool,
}

impl ConnectionString {
    /// `Key=Value;Key=Value`. Malformed or unknown parts are ignored.
    fn parse(value: &str) -> Self {
        let mut parsed = Self::default();
        for part in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let value = value.to_string();
            match key {
                "AccountName" => parsed.account_name = Some(value),
                "AccountKey" => parsed.account_key = Some(value),
                "EndpointSuffix" => parsed.endpoint_suffix = Some(value),
                "BlobEndpoint" => parsed.blob_endpoint = Some(value),
                "DefaultEndpointsProtocol" => parsed.protocol = Some(value),
                "UseDevelopmentStorage" => {
                    parsed.development_storage = value.eq_ignore_ascii_case("true")
                }
                _ => {}
            }
        }
        parsed
    }
}

impl StorageAccountOptions {
    /// Options for the local storage emulator account.
    pub fn development() -> Self {
        Self {
            use_development_storage: true,
            ..Self::default()
        }
    }

    fn connection(&self) -> ConnectionString {
        self.connection_string
            .as_deref()
            .map(ConnectionString::parse)
            .unwrap_or_default()
    }

    fn is_development(&self, connection: &ConnectionString) -> bool {
        self.use_development_storage || connection.development_storage
    }

    fn account_key(&self) -> Result<String, OptionsError> {
        let connection = self.connection();
        if self.is_development(&connection) {
            return Ok(EMULATOR_ACCOUNT_KEY.to_string());
        }
        non_empty(self.account_key.clone())
            .or(connection.account_key)
            .ok_or(OptionsError::MissingAccountKey)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl StorageOptions for StorageAccountOptions {
    fn account_name(&self) -> Result<String, OptionsError> {
        let connection = self.connection();
        if self.is_development(&connection) {
            return Ok(EMULATOR_ACCOUNT_NAME.to_string());
        }
        non_empty(self.account_name.clone())
            .or(connection.account_name)
            .ok_or(OptionsError::MissingAccountName)
    }

    fn endpoint(&self) -> Result<ServiceEndpoint, OptionsError> {
        let connection = self.connection();
        if let Some(explicit) = non_empty(self.blob_endpoint.clone()).or(connection.blob_endpoint.clone()) {
            return Ok(ServiceEndpoint::parse(&explicit)?);
        }
        if self.is_development(&connection) {
            return Ok(ServiceEndpoint::parse(EMULATOR_BLOB_ENDPOINT)?);
        }

        let account = self.account_name()?;
        let protocol = connection.protocol.as_deref().unwrap_or("https");
        let suffix = connection
            .endpoint_suffix
            .as_deref()
            .unwrap_or(self.cloud_instance.endpoint_suffix());
        Ok(ServiceEndpoint::parse(&format!(
            "{}://{}.blob.{}",
            protocol, account, suffix
        ))?)
    }

    fn credential(&self) -> Result<SharedKeyCredential, OptionsError> {
        Ok(SharedKeyCredential::new(
            self.account_name()?,
            &self.account_key()?,
        )?)
    }
}

/// Per-repository settings.
#[derive(Clone, Debug, Default)]
pub struct RepositoryOptions {
    /// Container made active when the repository is built.
    pub initial_container: Option<String>,
    /// Virtual root prefixed to names unless a call opts out.
    pub virtual_path: Option<String>,
}
