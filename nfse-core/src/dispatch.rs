//! Build, sign, send and interpret one webservice call.
use crate::certificate::CertificateStore;
use crate::config::{Config, ProviderIdentity};
use crate::document::{
    BuildError, Cancellation, CnpjLookup, DocumentBuilder, InvoiceQuery, Operation, PeriodQuery,
};
use crate::rps::{ReceiptBatch, ServiceRecord, ValidationError};
use crate::sign::{CanonicalSigner, SignedDocument, SigningError};
use crate::transport::{RemoteOperation, RemoteRequest, SoapTransport, Transport, TransportError};
use crate::xml::parse::{parse_element, text_by_local_name, ResponseError};
use crate::xml::Element;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Where the dispatcher is in the current (or last) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Building,
    Signing,
    Sending,
    Success,
    TransportFailure,
    ApplicationFault,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("{operation} failed in transport: {source}")]
    TransportFailure {
        operation: RemoteOperation,
        #[source]
        source: TransportError,
    },
    #[error("{operation} returned an unusable result: {reason}")]
    ApplicationFault {
        operation: RemoteOperation,
        reason: String,
    },
}

impl From<BuildError> for DispatchError {
    fn from(value: BuildError) -> Self {
        match value {
            BuildError::Validation(e) => DispatchError::Validation(e),
            BuildError::Signing(e) => DispatchError::Signing(e),
        }
    }
}

/// An `Alerta` or `Erro` entry of a result document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteMessage {
    pub code: Option<String>,
    pub description: Option<String>,
}

impl RemoteMessage {
    fn from_element(element: &Element) -> Self {
        let field = |name: &str| {
            element
                .child(name)
                .map(|e| e.text().trim().to_string())
                .filter(|text| !text.is_empty())
        };
        Self {
            code: field("Codigo"),
            description: field("Descricao"),
        }
    }
}

/// Result document embedded in a successful call.
///
/// A result whose `Cabecalho/Sucesso` is `false` is still a completed call;
/// the remote rejection details are in [`RemoteResponse::errors`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    operation: RemoteOperation,
    xml: String,
    root: Element,
}

impl RemoteResponse {
    /// Lifts `RetornoXML` out of a SOAP envelope and parses it.
    pub fn from_envelope(operation: RemoteOperation, envelope: &str) -> Result<Self, ResponseError> {
        let xml = text_by_local_name(envelope, "RetornoXML")?;
        let root = parse_element(&xml)?;
        Ok(Self {
            operation,
            xml,
            root,
        })
    }

    pub fn operation(&self) -> RemoteOperation {
        self.operation
    }

    /// Embedded result XML as received.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn success(&self) -> Option<bool> {
        match self.text(&["Cabecalho", "Sucesso"])?.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    pub fn alerts(&self) -> Vec<RemoteMessage> {
        self.messages("Alerta")
    }

    pub fn errors(&self) -> Vec<RemoteMessage> {
        self.messages("Erro")
    }

    /// Text of the element at `path` below the result root.
    pub fn text(&self, path: &[&str]) -> Option<String> {
        self.root.descendant(path).map(Element::text)
    }

    fn messages(&self, name: &str) -> Vec<RemoteMessage> {
        self.root
            .children()
            .filter(|child| child.name() == name)
            .map(RemoteMessage::from_element)
            .collect()
    }
}

/// Outcome of a test batch submission.
#[derive(Debug, Clone)]
pub struct BatchTestOutcome {
    /// Signed request exactly as sent.
    pub document: String,
    pub response: RemoteResponse,
}

/// Runs operations for one provider over one transport.
///
/// Calls are sequential: every method takes `&mut self` and returns only once
/// the remote call has completed or failed. Nothing is retried.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::config::Config;
/// use nfse_core::dispatch::Dispatcher;
///
/// let config = Config::from_properties("nfse.properties".as_ref())?;
/// let mut dispatcher = Dispatcher::from_config(&config)?;
/// let ccm = dispatcher.lookup_ccm("11222333000181")?;
/// println!("{ccm}");
/// # Ok::<(), nfse_core::Error>(())
/// ```
#[derive(Debug)]
pub struct Dispatcher<T> {
    provider: ProviderIdentity,
    store: CertificateStore,
    transport: T,
    state: CallState,
}

impl Dispatcher<SoapTransport> {
    /// Loads the certificate from the configured directory and connects over SOAP.
    pub fn from_config(config: &Config) -> Result<Self, crate::Error> {
        let store = CertificateStore::load_from_dir(config.certificate_dir(), config.passphrase())?;
        let transport = SoapTransport::from_config(config)?;
        Ok(Self::new(config.provider().clone(), store, transport))
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(provider: ProviderIdentity, store: CertificateStore, transport: T) -> Self {
        Self {
            provider,
            store,
            transport,
            state: CallState::Idle,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Builds and signs `operation` without sending it.
    pub fn render(&self, operation: &Operation) -> Result<SignedDocument, DispatchError> {
        let signer = CanonicalSigner::new(&self.store);
        let unsigned = DocumentBuilder::new(&self.provider).build(operation, &signer)?;
        Ok(unsigned.sign(&signer)?)
    }

    pub fn dispatch(&mut self, operation: &Operation) -> Result<RemoteResponse, DispatchError> {
        self.execute(operation).map(|(_, response)| response)
    }

    pub fn submit_receipt(&mut self, record: ServiceRecord) -> Result<RemoteResponse, DispatchError> {
        self.dispatch(&Operation::SubmitReceipt(record))
    }

    pub fn submit_batch(&mut self, batch: ReceiptBatch) -> Result<RemoteResponse, DispatchError> {
        self.dispatch(&Operation::SubmitBatch(batch))
    }

    /// Sends the batch to the validation-only operation and hands back the
    /// rendered request for inspection.
    pub fn submit_batch_test(
        &mut self,
        batch: ReceiptBatch,
    ) -> Result<BatchTestOutcome, DispatchError> {
        let (document, response) = self.execute(&Operation::SubmitBatchTest(batch))?;
        let document = document.to_xml();
        debug!(document = %document, "test batch document");
        Ok(BatchTestOutcome { document, response })
    }

    pub fn cancel(&mut self, invoice_numbers: Vec<String>) -> Result<RemoteResponse, DispatchError> {
        self.dispatch(&Operation::Cancel(Cancellation { invoice_numbers }))
    }

    pub fn query_invoice(&mut self, query: InvoiceQuery) -> Result<RemoteResponse, DispatchError> {
        self.dispatch(&Operation::QueryInvoice(query))
    }

    pub fn query_received(&mut self, query: PeriodQuery) -> Result<RemoteResponse, DispatchError> {
        self.dispatch(&Operation::QueryReceived(query))
    }

    pub fn query_issued(&mut self, query: PeriodQuery) -> Result<RemoteResponse, DispatchError> {
        self.dispatch(&Operation::QueryIssued(query))
    }

    pub fn query_batch(&mut self, batch_number: u64) -> Result<RemoteResponse, DispatchError> {
        self.dispatch(&Operation::QueryBatch { batch_number })
    }

    /// Without a batch number the service reports on the latest batch.
    pub fn batch_info(&mut self, batch_number: Option<u64>) -> Result<RemoteResponse, DispatchError> {
        self.dispatch(&Operation::BatchInfo { batch_number })
    }

    /// Municipal register (CCM) of the taxpayer with the given CNPJ.
    pub fn lookup_ccm(&mut self, cnpj: impl Into<String>) -> Result<String, DispatchError> {
        let response = self.dispatch(&Operation::LookupCcm(CnpjLookup { cnpj: cnpj.into() }))?;
        match response.text(&["Detalhe", "InscricaoMunicipal"]) {
            Some(ccm) if !ccm.trim().is_empty() => Ok(ccm.trim().to_string()),
            _ => {
                self.transition(response.operation(), CallState::ApplicationFault);
                Err(DispatchError::ApplicationFault {
                    operation: response.operation(),
                    reason: "result has no Detalhe/InscricaoMunicipal".into(),
                })
            }
        }
    }

    fn transition(&mut self, operation: RemoteOperation, next: CallState) {
        debug!(%operation, from = ?self.state, to = ?next, "call state");
        self.state = next;
    }

    fn settle<V, E>(&mut self, operation: RemoteOperation, result: Result<V, E>) -> Result<V, DispatchError>
    where
        E: Into<DispatchError>,
    {
        result.map_err(|e| {
            self.transition(operation, CallState::Idle);
            e.into()
        })
    }

    fn execute(
        &mut self,
        operation: &Operation,
    ) -> Result<(SignedDocument, RemoteResponse), DispatchError> {
        let remote = operation.remote();

        self.transition(remote, CallState::Building);
        let built = DocumentBuilder::new(&self.provider)
            .build(operation, &CanonicalSigner::new(&self.store));
        let unsigned = self.settle(remote, built)?;

        self.transition(remote, CallState::Signing);
        let signed = unsigned.sign(&CanonicalSigner::new(&self.store));
        let document = self.settle(remote, signed)?;

        self.transition(remote, CallState::Sending);
        let request = RemoteRequest::new(document.to_xml());
        let envelope = match self.transport.invoke(remote, &request) {
            Ok(envelope) => envelope,
            Err(source) => {
                error!(operation = %remote, error = %source, "transport failure");
                self.transition(remote, CallState::TransportFailure);
                return Err(DispatchError::TransportFailure {
                    operation: remote,
                    source,
                });
            }
        };

        match RemoteResponse::from_envelope(remote, &envelope) {
            Ok(response) => {
                self.transition(remote, CallState::Success);
                info!(operation = %remote, success = ?response.success(), "call completed");
                Ok((document, response))
            }
            Err(e) => {
                warn!(operation = %remote, error = %e, "unusable result");
                self.transition(remote, CallState::ApplicationFault);
                Err(DispatchError::ApplicationFault {
                    operation: remote,
                    reason: e.to_string(),
                })
            }
        }
    }
}
