mod common;

use base64ct::{Base64, Encoding};
use libxml::parser::Parser;
use libxml::tree::c14n::{CanonicalizationMode, CanonicalizationOptions};
use libxml::xpath;
use nfse_core::document::{Cancellation, DocumentBuilder, Operation};
use nfse_core::sign::{cancellation_signature_content, receipt_signature_content, CanonicalSigner};
use nfse_core::xml::Element;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use sha1::{Digest, Sha1};

fn libxml_c14n(xml: &str) -> String {
    let doc = Parser::default().parse_string(xml).expect("parse xml");
    doc.canonicalize(
        CanonicalizationOptions {
            mode: CanonicalizationMode::Canonical1_0,
            inclusive_ns_prefixes: vec![],
            with_comments: false,
        },
        None,
    )
    .expect("canonicalize")
}

fn sha1_base64(bytes: &[u8]) -> String {
    Base64::encode_string(&Sha1::digest(bytes))
}

fn verify(store: &nfse_core::certificate::CertificateStore, message: &[u8], signature_b64: &str) {
    let key = VerifyingKey::<Sha1>::new(store.public_key().clone());
    let bytes = Base64::decode_vec(signature_b64).expect("signature base64");
    let signature = Signature::try_from(bytes.as_slice()).expect("signature bytes");
    key.verify(message, &signature).expect("signature verifies");
}

#[test]
fn submit_receipt_document_is_signed_end_to_end() {
    let store = common::store();
    let provider = common::provider();
    let signer = CanonicalSigner::new(&store);
    let record = common::minimal_record();

    let unsigned = DocumentBuilder::new(&provider)
        .build(&Operation::SubmitReceipt(record.clone()), &signer)
        .expect("build");
    let expected_digest = sha1_base64(libxml_c14n(&unsigned.to_xml()).as_bytes());

    let signed = unsigned.sign(&signer).expect("sign");
    let root = signed.root();
    assert_eq!(root.name(), "PedidoEnvioRPS");
    assert_eq!(root.last_child().map(Element::name), Some("Signature"));
    assert_eq!(
        root.child("Cabecalho").and_then(|h| h.attribute("Versao")),
        Some("1")
    );
    assert_eq!(signed.digest_value(), expected_digest);

    let assinatura = root
        .descendant(&["RPS", "Assinatura"])
        .map(Element::text)
        .expect("receipt signature");
    verify(&store, receipt_signature_content(&record).as_bytes(), &assinatura);
}

#[test]
fn signed_document_digest_matches_libxml_after_removing_signature() {
    let store = common::store();
    let provider = common::provider();
    let signer = CanonicalSigner::new(&store);
    let signed = DocumentBuilder::new(&provider)
        .build(&Operation::QueryBatch { batch_number: 4 }, &signer)
        .and_then(|doc| Ok(doc.sign(&signer)?))
        .expect("signed document");

    let doc = Parser::default()
        .parse_string(&signed.to_xml())
        .expect("parse signed");
    let ctx = xpath::Context::new(&doc).expect("xpath context");
    let mut signature = ctx
        .evaluate("//*[local-name()='Signature']")
        .expect("signature xpath")
        .get_nodes_as_vec()
        .into_iter()
        .next()
        .expect("signature node");
    signature.unlink();
    let canonical = doc
        .canonicalize(
            CanonicalizationOptions {
                mode: CanonicalizationMode::Canonical1_0,
                inclusive_ns_prefixes: vec![],
                with_comments: false,
            },
            None,
        )
        .expect("canonicalize");
    assert_eq!(sha1_base64(canonical.as_bytes()), signed.digest_value());
}

#[test]
fn signature_value_covers_canonical_signed_info() {
    let store = common::store();
    let provider = common::provider();
    let signer = CanonicalSigner::new(&store);
    let signed = DocumentBuilder::new(&provider)
        .build(&Operation::BatchInfo { batch_number: None }, &signer)
        .and_then(|doc| Ok(doc.sign(&signer)?))
        .expect("signed document");

    let signed_info = format!(
        "<SignedInfo xmlns=\"http://www.w3.org/2000/09/xmldsig#\" \
         xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\
         <CanonicalizationMethod Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"></CanonicalizationMethod>\
         <SignatureMethod Algorithm=\"http://www.w3.org/2000/09/xmldsig#rsa-sha1\"></SignatureMethod>\
         <Reference URI=\"\"><Transforms>\
         <Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"></Transform>\
         <Transform Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"></Transform>\
         </Transforms>\
         <DigestMethod Algorithm=\"http://www.w3.org/2000/09/xmldsig#sha1\"></DigestMethod>\
         <DigestValue>{}</DigestValue></Reference></SignedInfo>",
        signed.digest_value()
    );
    verify(&store, signed_info.as_bytes(), signed.signature_value());
}

#[test]
fn each_cancelled_invoice_gets_its_own_signature() {
    let store = common::store();
    let provider = common::provider();
    let signer = CanonicalSigner::new(&store);
    let operation = Operation::Cancel(Cancellation {
        invoice_numbers: vec!["101".into(), "102".into()],
    });
    let document = DocumentBuilder::new(&provider)
        .build(&operation, &signer)
        .expect("build");

    let details: Vec<&Element> = document
        .root()
        .children()
        .filter(|child| child.name() == "Detalhe")
        .collect();
    assert_eq!(details.len(), 2);

    let mut signatures = Vec::new();
    for (detail, number) in details.iter().zip(["101", "102"]) {
        let key = detail.child("ChaveNFe").expect("invoice key");
        assert_eq!(key.child("NumeroNFe").map(Element::text).as_deref(), Some(number));
        let signature = key
            .child("AssinaturaCancelamento")
            .map(Element::text)
            .expect("cancellation signature");
        let content = cancellation_signature_content(provider.ccm(), number);
        verify(&store, sha1_base64(content.as_bytes()).as_bytes(), &signature);
        signatures.push(signature);
    }
    assert_ne!(signatures[0], signatures[1]);
}
