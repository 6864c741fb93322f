//! SOAP transport to the municipal webservice.
//!
//! The dispatcher only needs "invoke a named operation with one XML string and
//! get the response back". [`Transport`] is that seam; [`SoapTransport`] is the
//! HTTPS implementation used in production.
use crate::certificate::IDENTITY_FILE;
use crate::config::Config;
use crate::xml::constants::{NFE_NS, SCHEMA_VERSION, SOAP12_NS, SOAP_ACTION_BASE, XSD_NS, XSI_NS};
use crate::xml::parse::text_by_local_name;
use quick_xml::se::SeError;
use reqwest::blocking::Client;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info};

/// Remote operations exposed by the webservice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteOperation {
    EnvioRps,
    EnvioLoteRps,
    TesteEnvioLoteRps,
    CancelamentoNfe,
    ConsultaNfe,
    ConsultaNfeRecebidas,
    ConsultaNfeEmitidas,
    ConsultaLote,
    ConsultaInformacoesLote,
    ConsultaCnpj,
}

impl RemoteOperation {
    pub fn name(self) -> &'static str {
        match self {
            RemoteOperation::EnvioRps => "EnvioRPS",
            RemoteOperation::EnvioLoteRps => "EnvioLoteRPS",
            RemoteOperation::TesteEnvioLoteRps => "TesteEnvioLoteRPS",
            RemoteOperation::CancelamentoNfe => "CancelamentoNFe",
            RemoteOperation::ConsultaNfe => "ConsultaNFe",
            RemoteOperation::ConsultaNfeRecebidas => "ConsultaNFeRecebidas",
            RemoteOperation::ConsultaNfeEmitidas => "ConsultaNFeEmitidas",
            RemoteOperation::ConsultaLote => "ConsultaLote",
            RemoteOperation::ConsultaInformacoesLote => "ConsultaInformacoesLote",
            RemoteOperation::ConsultaCnpj => "ConsultaCNPJ",
        }
    }

    fn request_element(self) -> &'static str {
        match self {
            RemoteOperation::EnvioRps => "EnvioRPSRequest",
            RemoteOperation::EnvioLoteRps => "EnvioLoteRPSRequest",
            RemoteOperation::TesteEnvioLoteRps => "TesteEnvioLoteRPSRequest",
            RemoteOperation::CancelamentoNfe => "CancelamentoNFeRequest",
            RemoteOperation::ConsultaNfe => "ConsultaNFeRequest",
            RemoteOperation::ConsultaNfeRecebidas => "ConsultaNFeRecebidasRequest",
            RemoteOperation::ConsultaNfeEmitidas => "ConsultaNFeEmitidasRequest",
            RemoteOperation::ConsultaLote => "ConsultaLoteRequest",
            RemoteOperation::ConsultaInformacoesLote => "ConsultaInformacoesLoteRequest",
            RemoteOperation::ConsultaCnpj => "ConsultaCNPJRequest",
        }
    }

    /// SOAP action, the operation name in lower camel case under the service URI.
    pub fn soap_action(self) -> String {
        let name = self.name();
        let mut chars = name.chars();
        let lowered: String = chars
            .next()
            .map(|first| first.to_ascii_lowercase())
            .into_iter()
            .chain(chars)
            .collect();
        format!("{SOAP_ACTION_BASE}{lowered}")
    }
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters every remote operation takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub schema_version: u32,
    pub message_xml: String,
}

impl RemoteRequest {
    pub fn new(message_xml: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            message_xml: message_xml.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read client identity '{path}': {source}")]
    Identity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize SOAP envelope: {0}")]
    Envelope(#[from] SeError),
    #[error("SOAP fault (HTTP {status}): {reason}")]
    Fault { status: u16, reason: String },
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Remote procedure call collaborator.
pub trait Transport {
    /// Invokes `operation` and returns the raw response envelope.
    fn invoke(
        &mut self,
        operation: RemoteOperation,
        request: &RemoteRequest,
    ) -> Result<String, TransportError>;
}

#[derive(Serialize)]
#[serde(rename = "soap12:Envelope")]
struct Envelope<'a> {
    #[serde(rename = "@xmlns:xsi")]
    xsi: &'static str,
    #[serde(rename = "@xmlns:xsd")]
    xsd: &'static str,
    #[serde(rename = "@xmlns:soap12")]
    soap12: &'static str,
    #[serde(rename = "soap12:Body")]
    body: Body<'a>,
}

struct Body<'a> {
    operation: RemoteOperation,
    parameters: Parameters<'a>,
}

impl Serialize for Body<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut body = serializer.serialize_struct("soap12:Body", 1)?;
        body.serialize_field(self.operation.request_element(), &self.parameters)?;
        body.end()
    }
}

#[derive(Serialize)]
struct Parameters<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "VersaoSchema")]
    schema_version: u32,
    #[serde(rename = "MensagemXML")]
    message_xml: &'a str,
}

/// Renders the SOAP 1.2 envelope for one call.
pub fn soap_envelope(
    operation: RemoteOperation,
    request: &RemoteRequest,
) -> Result<String, TransportError> {
    let envelope = Envelope {
        xsi: XSI_NS,
        xsd: XSD_NS,
        soap12: SOAP12_NS,
        body: Body {
            operation,
            parameters: Parameters {
                xmlns: NFE_NS,
                schema_version: request.schema_version,
                message_xml: &request.message_xml,
            },
        },
    };
    let xml = quick_xml::se::to_string(&envelope)?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>{xml}"))
}

/// HTTPS transport over a blocking `reqwest` client.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::config::{Config, ProviderIdentity};
/// use nfse_core::transport::SoapTransport;
///
/// let provider = ProviderIdentity::new("12345678000195".into(), "39616924".into())?;
/// let transport = SoapTransport::from_config(&Config::new(provider, "certificates"))?;
/// # let _ = transport;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct SoapTransport {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl SoapTransport {
    /// Builds a client for the configured endpoint. When the certificate
    /// directory holds `key.pem`, it is presented as the TLS client identity.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let mut builder = Client::builder().timeout(config.timeout());
        let identity_path = config.certificate_dir().join(IDENTITY_FILE);
        if identity_path.exists() {
            let pem = std::fs::read(&identity_path).map_err(|source| TransportError::Identity {
                path: identity_path.clone(),
                source,
            })?;
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
            debug!(path = %identity_path.display(), "client identity loaded");
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: config.endpoint().to_string(),
            timeout: config.timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for SoapTransport {
    fn invoke(
        &mut self,
        operation: RemoteOperation,
        request: &RemoteRequest,
    ) -> Result<String, TransportError> {
        let envelope = soap_envelope(operation, request)?;
        let content_type = format!(
            "application/soap+xml; charset=utf-8; action=\"{}\"",
            operation.soap_action()
        );
        debug!(%operation, endpoint = %self.endpoint, "invoking remote operation");

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(envelope)
            .send()
            .inspect_err(|e| error!(%operation, error = %e, "remote call failed"))?;
        let status = response.status();
        let body = response.text()?;

        if status.is_success() {
            info!(%operation, status = status.as_u16(), "remote call completed");
            return Ok(body);
        }

        error!(%operation, status = status.as_u16(), "remote call rejected");
        match text_by_local_name(&body, "Text").or_else(|_| text_by_local_name(&body, "faultstring"))
        {
            Ok(reason) => Err(TransportError::Fault {
                status: status.as_u16(),
                reason: reason.trim().to_string(),
            }),
            Err(_) => Err(TransportError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }
}
