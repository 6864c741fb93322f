use chrono::NaiveDate;
use nfse_core::certificate::CertificateStore;
use nfse_core::config::ProviderIdentity;
use nfse_core::rps::{
    Address, Contractor, ContractorKind, Money, ReceiptKind, ReceiptStatus, ServiceRecord, TaxRate,
    Taxation,
};
use std::path::{Path, PathBuf};

#[allow(dead_code)]
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/certs")
        .join(name)
}

#[allow(dead_code)]
pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("read fixture")
}

#[allow(dead_code)]
pub fn provider() -> ProviderIdentity {
    ProviderIdentity::new("12345678000195".into(), "39616924".into()).expect("provider")
}

#[allow(dead_code)]
pub fn store() -> CertificateStore {
    CertificateStore::from_pem(
        &fixture("provider-cert.pem"),
        &fixture("provider-key.pem"),
        None,
    )
    .expect("certificate store")
}

#[allow(dead_code)]
pub fn minimal_record() -> ServiceRecord {
    ServiceRecord {
        provider_register: "39616924".into(),
        series: "NF".into(),
        number: "1".into(),
        issue_date: NaiveDate::from_ymd_opt(2024, 5, 2).expect("date"),
        kind: ReceiptKind::Receipt,
        status: ReceiptStatus::Normal,
        taxation: Taxation::InMunicipality,
        services_value: Money::from_cents(150_000),
        deductions_value: Money::ZERO,
        service_code: "7617".into(),
        tax_rate: TaxRate::from_basis_points(200).expect("rate"),
        tax_withheld: false,
        description: "Consultoria".into(),
        contractor: Contractor {
            kind: ContractorKind::Corporate,
            federal_tax_number: "11222333000181".into(),
            taxpayer_register: None,
            name: "Cliente Exemplo SA".into(),
            address: Address::default(),
            email: None,
        },
    }
}
