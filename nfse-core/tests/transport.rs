mod common;

use httpmock::prelude::*;
use nfse_core::config::Config;
use nfse_core::dispatch::{CallState, DispatchError, Dispatcher};
use nfse_core::transport::{RemoteOperation, SoapTransport, TransportError};
use std::time::Duration;
use tempfile::tempdir;

const SERVICE_PATH: &str = "/ws/lotenfe.asmx";

fn dispatcher(endpoint: String, cert_dir: &std::path::Path) -> Dispatcher<SoapTransport> {
    let config = Config::new(common::provider(), cert_dir)
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(5));
    let transport = SoapTransport::from_config(&config).expect("transport");
    Dispatcher::new(common::provider(), common::store(), transport)
}

#[test]
fn lookup_ccm_round_trips_through_soap() {
    let server = MockServer::start();
    let response = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><ConsultaCNPJResponse xmlns="http://www.prefeitura.sp.gov.br/nfe"><RetornoXML>&lt;?xml version="1.0" encoding="UTF-8"?&gt;&lt;RetornoConsultaCNPJ xmlns="http://www.prefeitura.sp.gov.br/nfe"&gt;&lt;Cabecalho xmlns="" Versao="1"&gt;&lt;Sucesso&gt;true&lt;/Sucesso&gt;&lt;/Cabecalho&gt;&lt;Detalhe xmlns=""&gt;&lt;InscricaoMunicipal&gt;22334455&lt;/InscricaoMunicipal&gt;&lt;EmiteNFe&gt;true&lt;/EmiteNFe&gt;&lt;/Detalhe&gt;&lt;/RetornoConsultaCNPJ&gt;</RetornoXML></ConsultaCNPJResponse></soap:Body></soap:Envelope>"#;
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(SERVICE_PATH)
            .header(
                "content-type",
                "application/soap+xml; charset=utf-8; action=\"http://www.prefeitura.sp.gov.br/nfe/ws/consultaCNPJ\"",
            )
            .body_contains("<ConsultaCNPJRequest xmlns=\"http://www.prefeitura.sp.gov.br/nfe\">")
            .body_contains("<VersaoSchema>1</VersaoSchema>")
            .body_contains("&lt;PedidoConsultaCNPJ");
        then.status(200)
            .header("content-type", "application/soap+xml; charset=utf-8")
            .body(response);
    });

    let dir = tempdir().expect("temp dir");
    let mut dispatcher = dispatcher(server.url(SERVICE_PATH), dir.path());
    let ccm = dispatcher.lookup_ccm("11222333000181").expect("lookup");

    mock.assert();
    assert_eq!(ccm, "22334455");
    assert_eq!(dispatcher.state(), CallState::Success);
}

#[test]
fn soap_fault_is_a_transport_failure() {
    let server = MockServer::start();
    let fault = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><soap:Fault><soap:Code><soap:Value>soap:Receiver</soap:Value></soap:Code><soap:Reason><soap:Text xml:lang="en">Server was unable to process request.</soap:Text></soap:Reason></soap:Fault></soap:Body></soap:Envelope>"#;
    server.mock(|when, then| {
        when.method(POST).path(SERVICE_PATH);
        then.status(500).body(fault);
    });

    let dir = tempdir().expect("temp dir");
    let mut dispatcher = dispatcher(server.url(SERVICE_PATH), dir.path());
    let err = dispatcher.query_batch(9).unwrap_err();
    match err {
        DispatchError::TransportFailure { operation, source } => {
            assert_eq!(operation, RemoteOperation::ConsultaLote);
            assert!(matches!(
                source,
                TransportError::Fault { status: 500, ref reason }
                    if reason == "Server was unable to process request."
            ));
        }
        other => panic!("expected transport failure, got {other:?}"),
    }
    assert_eq!(dispatcher.state(), CallState::TransportFailure);
}

#[test]
fn plain_http_error_keeps_status_and_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(SERVICE_PATH);
        then.status(503).body("maintenance");
    });

    let dir = tempdir().expect("temp dir");
    let mut dispatcher = dispatcher(server.url(SERVICE_PATH), dir.path());
    assert!(matches!(
        dispatcher.batch_info(Some(3)),
        Err(DispatchError::TransportFailure {
            source: TransportError::Status { status: 503, .. },
            ..
        })
    ));
}

#[test]
fn unreachable_endpoint_is_a_transport_failure() {
    let dir = tempdir().expect("temp dir");
    let mut dispatcher = dispatcher("http://127.0.0.1:9/ws/lotenfe.asmx".into(), dir.path());
    assert!(matches!(
        dispatcher.query_batch(1),
        Err(DispatchError::TransportFailure {
            source: TransportError::Http(_),
            ..
        })
    ));
}
