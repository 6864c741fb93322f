use nfse_derive::Validate;

#[derive(Validate)]
pub struct Contractor {
    pub name: String,
    #[validate(digits, max_len = 14)]
    pub federal_tax_number: String,
}

fn main() {
    let ok = Contractor::new("Tomador Exemplo".into(), "12345678000195".into());
    assert!(ok.is_ok());

    let bad = Contractor::new("Tomador Exemplo".into(), "12.345.678/0001-95".into());
    assert_eq!(
        bad.err().as_deref(),
        Some("federal_tax_number must contain only digits")
    );
}
