use nfse_derive::Validate;

#[derive(Validate)]
#[validate(non_empty, digits)]
pub struct InvoiceKey {
    pub taxpayer_register: String,
    pub invoice_number: String,
}

fn main() {
    let key = InvoiceKey::new("39616924".into(), "4105".into());
    assert!(key.is_ok());

    let empty = InvoiceKey::new("39616924".into(), "  ".into());
    assert!(empty.is_err());
}
