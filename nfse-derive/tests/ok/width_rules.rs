use nfse_derive::Validate;

#[derive(Debug)]
pub struct Violation(String);

impl From<String> for Violation {
    fn from(message: String) -> Self {
        Violation(message)
    }
}

#[derive(Validate)]
#[validate_error(Violation)]
pub struct Address {
    #[validate(max_len = 2)]
    pub state: String,
    #[validate(digits, exact_len = 8)]
    pub zip: Option<String>,
    #[validate(latin1, no_line_breaks)]
    pub city: String,
}

fn main() {
    let ok = Address {
        state: "SP".into(),
        zip: None,
        city: "São Paulo".into(),
    };
    assert!(ok.validate().is_ok());

    let bad_zip = Address::new("SP".into(), Some("0131".into()), "São Paulo".into());
    assert!(matches!(bad_zip, Err(Violation(ref m)) if m == "zip must be exactly 8 characters"));

    let bad_city = Address::new("SP".into(), None, "東京".into());
    assert!(bad_city.is_err());
}
