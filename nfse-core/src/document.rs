//! Request documents for each webservice operation.
//!
//! Every request is a `Pedido<Operation>` root in the NF-e namespace whose
//! direct children (`Cabecalho`, `RPS`, `Detalhe`, ...) are unqualified. Child
//! order is fixed: the service validates structure and the signature covers the
//! exact canonical bytes.
use crate::config::ProviderIdentity;
use crate::rps::format::{iso_date, zero_pad};
use crate::rps::{DateRange, ReceiptBatch, ServiceRecord, ValidationError};
use crate::sign::{CanonicalSigner, SigningError, UnsignedDocument};
use crate::transport::RemoteOperation;
use crate::xml::constants::{NFE_NS, XSD_NS, XSI_NS};
use crate::xml::Element;
use nfse_derive::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Receipt key used when querying by RPS instead of invoice number.
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
pub struct ReceiptKey {
    #[validate(no_line_breaks, xml_chars, max_len = 5)]
    pub series: String,
    #[validate(non_empty, digits, max_len = 12)]
    pub number: String,
}

/// Looks up one invoice by its number, its originating receipt, or both.
#[derive(Validate, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
#[serde(default)]
pub struct InvoiceQuery {
    #[validate(non_empty, digits, max_len = 12)]
    pub invoice_number: Option<String>,
    pub receipt: Option<ReceiptKey>,
}

impl InvoiceQuery {
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.invoice_number.is_none() && self.receipt.is_none() {
            return Err(ValidationError::EmptyQuery);
        }
        self.validate()?;
        if let Some(receipt) = &self.receipt {
            receipt.validate()?;
        }
        Ok(())
    }
}

fn first_page() -> u32 {
    1
}

/// Invoices received or issued by a taxpayer over a date range.
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
pub struct PeriodQuery {
    #[validate(digits, exact_len = 14)]
    pub cnpj: String,
    #[validate(non_empty, digits, max_len = 8)]
    pub ccm: String,
    pub range: DateRange,
    #[serde(default = "first_page")]
    pub page: u32,
}

impl PeriodQuery {
    pub fn check(&self) -> Result<(), ValidationError> {
        self.validate()?;
        if self.page == 0 {
            return Err(ValidationError::PageOutOfRange);
        }
        Ok(())
    }
}

/// Invoices to cancel, each signed on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub invoice_numbers: Vec<String>,
}

impl Cancellation {
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.invoice_numbers.is_empty() {
            return Err(ValidationError::NothingToCancel);
        }
        for number in &self.invoice_numbers {
            if number.is_empty() || number.len() > 12 || !number.chars().all(|c| c.is_ascii_digit())
            {
                return Err(ValidationError::Field(format!(
                    "invoice number '{number}' must be 1 to 12 digits"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
pub struct CnpjLookup {
    #[validate(non_empty, digits, max_len = 14)]
    pub cnpj: String,
}

/// A logical request, one variant per webservice operation.
///
/// Serialized adjacently tagged, e.g.
/// `{"operation": "query_batch", "request": {"batch_number": 12}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "request", rename_all = "snake_case")]
pub enum Operation {
    SubmitReceipt(ServiceRecord),
    SubmitBatch(ReceiptBatch),
    /// Same document as [`Operation::SubmitBatch`], validated by the service
    /// without issuing invoices.
    SubmitBatchTest(ReceiptBatch),
    Cancel(Cancellation),
    QueryInvoice(InvoiceQuery),
    QueryReceived(PeriodQuery),
    QueryIssued(PeriodQuery),
    QueryBatch { batch_number: u64 },
    /// Without a batch number the service answers for the most recent batch.
    BatchInfo {
        #[serde(default)]
        batch_number: Option<u64>,
    },
    LookupCcm(CnpjLookup),
}

impl Operation {
    pub fn remote(&self) -> RemoteOperation {
        match self {
            Operation::SubmitReceipt(_) => RemoteOperation::EnvioRps,
            Operation::SubmitBatch(_) => RemoteOperation::EnvioLoteRps,
            Operation::SubmitBatchTest(_) => RemoteOperation::TesteEnvioLoteRps,
            Operation::Cancel(_) => RemoteOperation::CancelamentoNfe,
            Operation::QueryInvoice(_) => RemoteOperation::ConsultaNfe,
            Operation::QueryReceived(_) => RemoteOperation::ConsultaNfeRecebidas,
            Operation::QueryIssued(_) => RemoteOperation::ConsultaNfeEmitidas,
            Operation::QueryBatch { .. } => RemoteOperation::ConsultaLote,
            Operation::BatchInfo { .. } => RemoteOperation::ConsultaInformacoesLote,
            Operation::LookupCcm(_) => RemoteOperation::ConsultaCnpj,
        }
    }

    /// Root element name of the request document.
    pub fn root_name(&self) -> &'static str {
        match self {
            Operation::SubmitReceipt(_) => "PedidoEnvioRPS",
            Operation::SubmitBatch(_) | Operation::SubmitBatchTest(_) => "PedidoEnvioLoteRPS",
            Operation::Cancel(_) => "PedidoCancelamentoNFe",
            Operation::QueryInvoice(_) => "PedidoConsultaNFe",
            Operation::QueryReceived(_) | Operation::QueryIssued(_) => "PedidoConsultaNFePeriodo",
            Operation::QueryBatch { .. } => "PedidoConsultaLote",
            Operation::BatchInfo { .. } => "PedidoInformacoesLote",
            Operation::LookupCcm(_) => "PedidoConsultaCNPJ",
        }
    }

    /// Field-width and required-field checks, run before anything is built.
    pub fn check(&self) -> Result<(), ValidationError> {
        match self {
            Operation::SubmitReceipt(record) => record.check(),
            Operation::SubmitBatch(batch) | Operation::SubmitBatchTest(batch) => batch.check(),
            Operation::Cancel(cancellation) => cancellation.check(),
            Operation::QueryInvoice(query) => query.check(),
            Operation::QueryReceived(query) | Operation::QueryIssued(query) => query.check(),
            Operation::QueryBatch { .. } | Operation::BatchInfo { .. } => Ok(()),
            Operation::LookupCcm(lookup) => lookup.validate(),
        }
    }
}

/// Renders operations into unsigned documents for one provider.
#[derive(Debug, Clone, Copy)]
pub struct DocumentBuilder<'a> {
    provider: &'a ProviderIdentity,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(provider: &'a ProviderIdentity) -> Self {
        Self { provider }
    }

    /// Validates `operation` and renders its document. Receipt and cancellation
    /// signatures are computed here; the whole-document signature is not.
    pub fn build(
        &self,
        operation: &Operation,
        signer: &CanonicalSigner<'_>,
    ) -> Result<UnsignedDocument, BuildError> {
        operation.check()?;
        let mut header = self.header();
        let mut body = Vec::new();

        match operation {
            Operation::SubmitReceipt(record) => {
                body.push(self.receipt(record, signer)?);
            }
            Operation::SubmitBatch(batch) | Operation::SubmitBatchTest(batch) => {
                header = header
                    .with_text_child("transacao", "false")
                    .with_text_child("dtInicio", iso_date(batch.range.start()))
                    .with_text_child("dtFim", iso_date(batch.range.end()))
                    .with_text_child("QtdRPS", batch.records.len().to_string())
                    .with_text_child("ValorTotalServicos", batch.totals.services.to_string())
                    .with_text_child("ValorTotalDeducoes", batch.totals.deductions.to_string());
                for record in &batch.records {
                    body.push(self.receipt(record, signer)?);
                }
            }
            Operation::Cancel(cancellation) => {
                header = header.with_text_child("transacao", "false");
                for number in &cancellation.invoice_numbers {
                    let signature = signer.sign_cancellation(self.provider.ccm(), number)?;
                    body.push(detail(
                        self.invoice_key(number)
                            .with_text_child("AssinaturaCancelamento", signature),
                    ));
                }
            }
            Operation::QueryInvoice(query) => {
                if let Some(number) = &query.invoice_number {
                    body.push(detail(self.invoice_key(number)));
                }
                if let Some(receipt) = &query.receipt {
                    body.push(detail(self.receipt_key(&receipt.series, &receipt.number)));
                }
            }
            Operation::QueryReceived(query) | Operation::QueryIssued(query) => {
                header = header
                    .with_child(Element::new("CPFCNPJ").with_text_child("CNPJ", query.cnpj.as_str()))
                    .with_text_child("Inscricao", query.ccm.as_str())
                    .with_text_child("dtInicio", iso_date(query.range.start()))
                    .with_text_child("dtFim", iso_date(query.range.end()))
                    .with_text_child("NumeroPagina", query.page.to_string());
            }
            Operation::QueryBatch { batch_number } => {
                header = header.with_text_child("NumeroLote", batch_number.to_string());
            }
            Operation::BatchInfo { batch_number } => {
                header = header.with_text_child("InscricaoPrestador", self.provider.ccm());
                if let Some(number) = batch_number {
                    header = header.with_text_child("NumeroLote", number.to_string());
                }
            }
            Operation::LookupCcm(lookup) => {
                body.push(
                    Element::new("CNPJContribuinte")
                        .with_namespace("", "")
                        .with_text_child("CNPJ", zero_pad(&lookup.cnpj, 14)),
                );
            }
        }

        let mut root = request_root(operation.root_name()).with_child(header);
        for element in body {
            root.push(element);
        }
        Ok(UnsignedDocument::new(root))
    }

    fn header(&self) -> Element {
        Element::new("Cabecalho")
            .with_namespace("", "")
            .with_attribute("Versao", "1")
            .with_child(
                Element::new("CPFCNPJRemetente").with_text_child("CNPJ", self.provider.cnpj()),
            )
    }

    fn invoice_key(&self, invoice_number: &str) -> Element {
        Element::new("ChaveNFe")
            .with_text_child("InscricaoPrestador", self.provider.ccm())
            .with_text_child("NumeroNFe", invoice_number)
    }

    fn receipt_key(&self, series: &str, number: &str) -> Element {
        Element::new("ChaveRPS")
            .with_text_child("InscricaoPrestador", self.provider.ccm())
            .with_text_child("SerieRPS", series)
            .with_text_child("NumeroRPS", number)
    }

    fn receipt(
        &self,
        record: &ServiceRecord,
        signer: &CanonicalSigner<'_>,
    ) -> Result<Element, BuildError> {
        let signature = signer.sign_receipt(record)?;
        let contractor = &record.contractor;
        let mut rps = Element::new("RPS")
            .with_namespace("", "")
            .with_text_child("Assinatura", signature)
            .with_child(
                Element::new("ChaveRPS")
                    .with_text_child("InscricaoPrestador", record.provider_register.as_str())
                    .with_text_child("SerieRPS", record.series.as_str())
                    .with_text_child("NumeroRPS", record.number.as_str()),
            )
            .with_text_child("TipoRPS", record.kind.code())
            .with_text_child("DataEmissao", iso_date(record.issue_date))
            .with_text_child("StatusRPS", record.status.code().to_string())
            .with_text_child("TributacaoRPS", record.taxation.code().to_string())
            .with_text_child("ValorServicos", record.services_value.to_string())
            .with_text_child("ValorDeducoes", record.deductions_value.to_string())
            .with_text_child("CodigoServico", record.service_code.as_str())
            .with_text_child("AliquotaServicos", record.tax_rate.as_fraction())
            .with_text_child("ISSRetido", if record.tax_withheld { "true" } else { "false" })
            .with_child(Element::new("CPFCNPJTomador").with_text_child(
                "CNPJ",
                zero_pad(&contractor.federal_tax_number, 14),
            ))
            .with_text_child("RazaoSocialTomador", contractor.name.as_str());
        if let Some(email) = &contractor.email {
            rps = rps.with_text_child("EmailTomador", email.as_str());
        }
        Ok(rps.with_text_child("Discriminacao", record.description.as_str()))
    }
}

fn request_root(name: &str) -> Element {
    Element::new(name)
        .with_namespace("", NFE_NS)
        .with_namespace("xsd", XSD_NS)
        .with_namespace("xsi", XSI_NS)
}

fn detail(key: Element) -> Element {
    Element::new("Detalhe").with_namespace("", "").with_child(key)
}
