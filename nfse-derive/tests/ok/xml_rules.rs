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
pub struct Contractor {
    #[validate(xml_chars)]
    pub name: String,
    #[validate(letters, exact_len = 2)]
    pub state: Option<String>,
}

fn main() {
    let ok = Contractor::new("Tomador\tLtda\r\n".into(), Some("SP".into()));
    assert!(ok.is_ok());

    let control = Contractor::new("ACME\u{1}SA".into(), None);
    assert!(
        matches!(control, Err(Violation(ref m)) if m == "name contains a character not allowed in XML")
    );

    let line_break = Contractor::new("ACME".into(), Some("\r\n".into()));
    assert!(matches!(line_break, Err(Violation(ref m)) if m == "state must contain only letters"));
}
