//! Provider identity and client configuration.
use crate::rps::ValidationError;
use java_properties::read;
use nfse_derive::Validate;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Production webservice for the São Paulo NF-e.
pub const DEFAULT_ENDPOINT: &str = "https://nfe.prefeitura.sp.gov.br/ws/lotenfe.asmx";
/// Overrides the endpoint of any loaded configuration.
pub const ENDPOINT_ENV_VAR: &str = "NFSE_ENDPOINT_URL";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse properties from '{path}': {source}")]
    PropertiesRead {
        path: PathBuf,
        #[source]
        source: java_properties::PropertiesError,
    },
    #[error("missing required property '{key}' in file '{path}'")]
    MissingProperty { path: PathBuf, key: String },
    #[error("invalid value for '{key}' in file '{path}': {message}")]
    InvalidProperty {
        path: PathBuf,
        key: String,
        message: String,
    },
    #[error("invalid provider identity: {0}")]
    Provider(#[from] ValidationError),
}

/// Identifiers of the invoicing party, fixed for the life of a session.
///
/// # Examples
/// ```rust
/// use nfse_core::config::ProviderIdentity;
///
/// let provider = ProviderIdentity::new("12345678000195".into(), "39616924".into())?;
/// assert_eq!(provider.ccm(), "39616924");
/// assert!(ProviderIdentity::new("123".into(), "39616924".into()).is_err());
/// # Ok::<(), nfse_core::rps::ValidationError>(())
/// ```
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
#[serde(try_from = "RawProvider")]
pub struct ProviderIdentity {
    #[validate(digits, exact_len = 14)]
    cnpj: String,
    #[validate(non_empty, digits, max_len = 8)]
    ccm: String,
}

#[derive(Deserialize)]
struct RawProvider {
    cnpj: String,
    ccm: String,
}

impl TryFrom<RawProvider> for ProviderIdentity {
    type Error = ValidationError;

    fn try_from(raw: RawProvider) -> Result<Self, Self::Error> {
        ProviderIdentity::new(raw.cnpj, raw.ccm)
    }
}

impl ProviderIdentity {
    /// Federal tax number, 14 digits.
    pub fn cnpj(&self) -> &str {
        &self.cnpj
    }

    /// Municipal taxpayer register.
    pub fn ccm(&self) -> &str {
        &self.ccm
    }
}

/// Client configuration. Nothing here is global; pass it to the constructors
/// that need it.
///
/// # Examples
/// ```rust
/// use nfse_core::config::{Config, ProviderIdentity, DEFAULT_ENDPOINT};
///
/// let provider = ProviderIdentity::new("12345678000195".into(), "39616924".into())?;
/// let config = Config::new(provider, "certificates");
/// assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
/// # Ok::<(), nfse_core::rps::ValidationError>(())
/// ```
#[derive(Clone)]
pub struct Config {
    provider: ProviderIdentity,
    endpoint: String,
    timeout: Duration,
    certificate_dir: PathBuf,
    passphrase: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("certificate_dir", &self.certificate_dir)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    pub fn new(provider: ProviderIdentity, certificate_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            certificate_dir: certificate_dir.into(),
            passphrase: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Replaces the endpoint with `NFSE_ENDPOINT_URL` when it is set and non-empty.
    pub fn with_env_overrides(self) -> Self {
        match std::env::var(ENDPOINT_ENV_VAR) {
            Ok(url) if !url.trim().is_empty() => self.with_endpoint(url.trim()),
            _ => self,
        }
    }

    /// Loads a `.properties` file.
    ///
    /// Required keys are `nfe.provider.cnpj`, `nfe.provider.ccm` and
    /// `nfe.certificate.dir`. A relative certificate directory is resolved against
    /// the directory holding the file.
    pub fn from_properties(path: &Path) -> Result<Config, ConfigError> {
        let pathbuf = path.to_path_buf();
        let file = File::open(path).map_err(|e| ConfigError::Io {
            path: pathbuf.clone(),
            source: e,
        })?;
        let props = read(BufReader::new(file)).map_err(|e| ConfigError::PropertiesRead {
            path: pathbuf.clone(),
            source: e,
        })?;

        let opt = |key: &str| -> Option<String> {
            props
                .get(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let req = |key: &str| -> Result<String, ConfigError> {
            opt(key).ok_or_else(|| ConfigError::MissingProperty {
                path: pathbuf.clone(),
                key: key.to_string(),
            })
        };

        let provider = ProviderIdentity::new(req("nfe.provider.cnpj")?, req("nfe.provider.ccm")?)?;
        let mut certificate_dir = PathBuf::from(req("nfe.certificate.dir")?);
        if certificate_dir.is_relative() {
            if let Some(parent) = path.parent() {
                certificate_dir = parent.join(certificate_dir);
            }
        }

        let mut config = Config::new(provider, certificate_dir);
        if let Some(passphrase) = opt("nfe.certificate.passphrase") {
            config = config.with_passphrase(passphrase);
        }
        if let Some(url) = opt("nfe.endpoint.url") {
            config = config.with_endpoint(url);
        }
        if let Some(timeout) = opt("nfe.connection.timeout") {
            let secs: u64 = timeout.parse().map_err(|_| ConfigError::InvalidProperty {
                path: pathbuf.clone(),
                key: "nfe.connection.timeout".into(),
                message: format!("expected whole seconds, got '{timeout}'"),
            })?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config.with_env_overrides())
    }

    pub fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn certificate_dir(&self) -> &Path {
        &self.certificate_dir
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }
}
