//! Client for the São Paulo NFS-e webservice (Nota Fiscal Paulistana): signed
//! request documents, SOAP dispatch and the offline batch text file.
//!
//! # Examples
//! ```rust
//! use nfse_core::config::{Config, ProviderIdentity};
//!
//! let provider = ProviderIdentity::new("12345678000195".into(), "39616924".into())?;
//! let config = Config::new(provider, "certificates");
//! # let _ = config;
//! # Ok::<(), nfse_core::rps::ValidationError>(())
//! ```
pub mod certificate;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod rps;
pub mod sign;
pub mod transport;
pub mod xml;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Certificate(#[from] certificate::CertificateError),
    #[error(transparent)]
    Validation(#[from] rps::ValidationError),
    #[error(transparent)]
    Signing(#[from] sign::SigningError),
    #[error(transparent)]
    Build(#[from] document::BuildError),
    #[error(transparent)]
    BatchFile(#[from] rps::batch::BatchFileError),
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
    #[error(transparent)]
    Response(#[from] xml::parse::ResponseError),
    #[error(transparent)]
    Dispatch(#[from] dispatch::DispatchError),
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::certificate::CertificateError;
    use crate::config::ConfigError;
    use crate::dispatch::DispatchError;
    use crate::document::BuildError;
    use crate::rps::batch::BatchFileError;
    use crate::rps::ValidationError;
    use crate::sign::SigningError;
    use crate::transport::{RemoteOperation, TransportError};
    use crate::xml::parse::ResponseError;

    #[test]
    fn error_conversions_cover_variants() {
        let err: Error = ConfigError::MissingProperty {
            path: "nfse.properties".into(),
            key: "nfe.provider.ccm".into(),
        }
        .into();
        assert!(matches!(err, Error::Config(_)));

        let err: Error = CertificateError::Unreadable {
            reason: "corrupt".into(),
        }
        .into();
        assert!(matches!(err, Error::Certificate(_)));

        let err: Error = ValidationError::EmptyBatch.into();
        assert!(matches!(err, Error::Validation(_)));

        let err: Error = SigningError::MissingSignature.into();
        assert!(matches!(err, Error::Signing(_)));

        let err: Error = BuildError::Validation(ValidationError::NothingToCancel).into();
        assert!(matches!(err, Error::Build(_)));

        let err: Error = BatchFileError::MalformedLine {
            reason: "short".into(),
        }
        .into();
        assert!(matches!(err, Error::BatchFile(_)));

        let err: Error = TransportError::Status {
            status: 500,
            body: String::new(),
        }
        .into();
        assert!(matches!(err, Error::Transport(_)));

        let err: Error = ResponseError::MissingField("RetornoXML".into()).into();
        assert!(matches!(err, Error::Response(_)));

        let err: Error = DispatchError::ApplicationFault {
            operation: RemoteOperation::ConsultaLote,
            reason: "empty".into(),
        }
        .into();
        assert!(matches!(err, Error::Dispatch(_)));
    }

    #[test]
    fn certificate_errors_keep_their_message() {
        let err: Error = CertificateError::Unreadable {
            reason: "wrong passphrase".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "certificate material is unreadable: wrong passphrase"
        );
    }
}
