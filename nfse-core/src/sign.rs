//! Enveloped XML signatures and record-level content signatures.
//!
//! Two kinds of signature exist:
//! - the whole-document signature, a `Signature` element appended as the last
//!   child of the request root;
//! - record signatures over fixed-width strings (`Assinatura` on each receipt,
//!   `AssinaturaCancelamento` on each cancelled invoice).
use crate::certificate::{CertificateError, CertificateStore};
use crate::rps::format::{compact_date, space_pad_right, zero_pad};
use crate::rps::ServiceRecord;
use crate::xml::constants::{
    C14N_ALGORITHM, DS_NS, ENVELOPED_SIGNATURE_TRANSFORM, RSA_SHA1_ALGORITHM, SHA1_ALGORITHM,
};
use crate::xml::{Element, NamespaceScope};
use base64ct::{Base64, Encoding};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error("signed document has no Signature element")]
    MissingSignature,
}

/// Request document whose content may still change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedDocument {
    root: Element,
}

impl UnsignedDocument {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    /// Serialized document, unsigned.
    pub fn to_xml(&self) -> String {
        self.root.to_document_string()
    }

    pub fn sign(self, signer: &CanonicalSigner<'_>) -> Result<SignedDocument, SigningError> {
        signer.sign_document(self)
    }
}

/// Request document carrying its enveloped signature.
///
/// There is no mutable access: changing content means going back through
/// [`SignedDocument::into_unsigned`] and signing again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    root: Element,
    digest_value: String,
    signature_value: String,
}

impl SignedDocument {
    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn digest_value(&self) -> &str {
        &self.digest_value
    }

    pub fn signature_value(&self) -> &str {
        &self.signature_value
    }

    /// Serialized document as sent over the wire.
    pub fn to_xml(&self) -> String {
        self.root.to_document_string()
    }

    /// Drops the signature, giving back the content it covered.
    pub fn into_unsigned(self) -> Result<UnsignedDocument, SigningError> {
        let mut root = self.root;
        match root.last_child() {
            Some(last) if last.name() == "Signature" => {}
            _ => return Err(SigningError::MissingSignature),
        }
        root.remove_last_child("Signature");
        Ok(UnsignedDocument { root })
    }
}

/// base64(SHA-1(c14n(root))).
pub fn digest_value(root: &Element) -> String {
    let canonical = root.canonicalize();
    Base64::encode_string(&Sha1::digest(canonical.as_bytes()))
}

/// Content signed into a receipt's `Assinatura`, 86 ASCII characters for
/// in-range values.
pub fn receipt_signature_content(record: &ServiceRecord) -> String {
    let mut content = String::with_capacity(86);
    content.push_str(&zero_pad(&record.provider_register, 8));
    content.push_str(&space_pad_right(&record.series, 5));
    content.push_str(&zero_pad(&record.number, 12));
    content.push_str(&compact_date(record.issue_date));
    content.push(record.taxation.code());
    content.push(record.status.code());
    content.push(if record.tax_withheld { 'S' } else { 'N' });
    content.push_str(&record.services_value.fixed_width());
    content.push_str(&record.deductions_value.fixed_width());
    content.push_str(&zero_pad(&record.service_code, 5));
    content.push(record.contractor.kind.code());
    content.push_str(&zero_pad(&record.contractor.federal_tax_number, 14));
    content
}

/// Content behind an `AssinaturaCancelamento`: provider CCM then invoice number.
pub fn cancellation_signature_content(provider_ccm: &str, invoice_number: &str) -> String {
    format!("{}{}", zero_pad(provider_ccm, 8), zero_pad(invoice_number, 12))
}

/// Signs documents and records with the provider's certificate.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalSigner<'a> {
    store: &'a CertificateStore,
}

impl<'a> CanonicalSigner<'a> {
    pub fn new(store: &'a CertificateStore) -> Self {
        Self { store }
    }

    /// Appends the enveloped signature as the last child of the root.
    ///
    /// The digest is taken over the root as it stands, before the `Signature`
    /// element exists.
    pub fn sign_document(&self, document: UnsignedDocument) -> Result<SignedDocument, SigningError> {
        let mut root = document.root;
        let digest = digest_value(&root);

        let shell = Element::new("Signature").with_namespace("", DS_NS);
        let signature_scope = shell.scope_within(&root.scope_within(&NamespaceScope::new()));
        let signed_info = signed_info(&digest);
        let canonical_signed_info = signed_info.canonicalize_within(&signature_scope);
        let signature_value = Base64::encode_string(&self.store.sign(canonical_signed_info.as_bytes())?);

        root.push(
            shell
                .with_child(signed_info)
                .with_text_child("SignatureValue", signature_value.as_str())
                .with_child(Element::new("KeyInfo").with_child(
                    Element::new("X509Data")
                        .with_text_child("X509Certificate", self.store.certificate_base64()),
                )),
        );
        debug!(root = root.name(), digest = %digest, "document signed");

        Ok(SignedDocument {
            root,
            digest_value: digest,
            signature_value,
        })
    }

    /// base64 RSA-SHA1 signature over the receipt content string.
    pub fn sign_receipt(&self, record: &ServiceRecord) -> Result<String, SigningError> {
        let content = receipt_signature_content(record);
        Ok(Base64::encode_string(&self.store.sign(content.as_bytes())?))
    }

    /// Cancellation signature for one invoice.
    ///
    /// The webservice expects the RSA-SHA1 signature to cover the base64 SHA-1
    /// digest of the content string, not the content itself.
    pub fn sign_cancellation(
        &self,
        provider_ccm: &str,
        invoice_number: &str,
    ) -> Result<String, SigningError> {
        let content = cancellation_signature_content(provider_ccm, invoice_number);
        let digest = Base64::encode_string(&Sha1::digest(content.as_bytes()));
        Ok(Base64::encode_string(&self.store.sign(digest.as_bytes())?))
    }
}

fn algorithm(name: &str, uri: &str) -> Element {
    Element::new(name).with_attribute("Algorithm", uri)
}

fn signed_info(digest: &str) -> Element {
    Element::new("SignedInfo")
        .with_child(algorithm("CanonicalizationMethod", C14N_ALGORITHM))
        .with_child(algorithm("SignatureMethod", RSA_SHA1_ALGORITHM))
        .with_child(
            Element::new("Reference")
                .with_attribute("URI", "")
                .with_child(
                    Element::new("Transforms")
                        .with_child(algorithm("Transform", ENVELOPED_SIGNATURE_TRANSFORM))
                        .with_child(algorithm("Transform", C14N_ALGORITHM)),
                )
                .with_child(algorithm("DigestMethod", SHA1_ALGORITHM))
                .with_text_child("DigestValue", digest),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rps::tests::sample_record;
    use crate::rps::{ContractorKind, Money, ReceiptStatus, Taxation};
    use crate::xml::constants::{NFE_NS, XSD_NS, XSI_NS};

    const CERT_PEM: &str = include_str!("../tests/fixtures/certs/provider-cert.pem");
    const KEY_PEM: &str = include_str!("../tests/fixtures/certs/provider-key.pem");

    fn store() -> CertificateStore {
        CertificateStore::from_pem(CERT_PEM, KEY_PEM, None).unwrap()
    }

    fn document() -> UnsignedDocument {
        UnsignedDocument::new(
            Element::new("PedidoConsultaLote")
                .with_namespace("xsd", XSD_NS)
                .with_namespace("", NFE_NS)
                .with_namespace("xsi", XSI_NS)
                .with_child(
                    Element::new("Cabecalho")
                        .with_namespace("", "")
                        .with_attribute("Versao", "1")
                        .with_text_child("NumeroLote", "123"),
                ),
        )
    }

    #[test]
    fn receipt_content_follows_fixed_layout() {
        let mut record = sample_record();
        record.taxation = Taxation::Exempt;
        record.status = ReceiptStatus::Cancelled;
        record.tax_withheld = true;
        record.deductions_value = Money::from_cents(1_000);
        record.contractor.kind = ContractorKind::Individual;
        record.contractor.federal_tax_number = "12345678909".into();

        let content = receipt_signature_content(&record);
        assert_eq!(
            content,
            "39616924A    00000000410520240315ICS00000000012345000000000000100002658100012345678909"
        );
        assert_eq!(content.len(), 86);
    }

    #[test]
    fn cancellation_content_pads_both_fields() {
        assert_eq!(
            cancellation_signature_content("3961692", "4105"),
            "03961692000000004105"
        );
    }

    #[test]
    fn signature_is_last_child_with_fixed_structure() {
        let store = store();
        let signed = document().sign(&CanonicalSigner::new(&store)).unwrap();
        let signature = signed.root().last_child().unwrap();
        assert_eq!(signature.name(), "Signature");
        assert_eq!(signature.namespace(""), Some(DS_NS));

        let names: Vec<&str> = signature.children().map(Element::name).collect();
        assert_eq!(names, ["SignedInfo", "SignatureValue", "KeyInfo"]);
        assert_eq!(
            signature
                .descendant(&["SignedInfo", "Reference", "DigestValue"])
                .map(Element::text)
                .as_deref(),
            Some(signed.digest_value())
        );
        assert_eq!(
            signature
                .descendant(&["KeyInfo", "X509Data", "X509Certificate"])
                .map(Element::text),
            Some(store.certificate_base64())
        );
    }

    #[test]
    fn signing_twice_is_deterministic() {
        let store = store();
        let signer = CanonicalSigner::new(&store);
        let first = document().sign(&signer).unwrap();
        let second = document().sign(&signer).unwrap();
        assert_eq!(first.digest_value(), second.digest_value());
        assert_eq!(first.signature_value(), second.signature_value());
        assert_eq!(first.to_xml(), second.to_xml());
    }

    #[test]
    fn changed_content_requires_new_signature() {
        let store = store();
        let signer = CanonicalSigner::new(&store);
        let signed = document().sign(&signer).unwrap();
        let original_digest = signed.digest_value().to_string();

        let mut unsigned = signed.into_unsigned().unwrap();
        assert_eq!(unsigned, document());
        unsigned
            .root_mut()
            .push(Element::new("Detalhe").with_namespace("", ""));
        let resigned = unsigned.sign(&signer).unwrap();
        assert_ne!(resigned.digest_value(), original_digest);
    }

    #[test]
    fn digest_excludes_signature_subtree() {
        let store = store();
        let signed = document().sign(&CanonicalSigner::new(&store)).unwrap();
        assert_eq!(signed.digest_value(), digest_value(document().root()));
    }
}
