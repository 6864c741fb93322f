use nfse_derive::Validate;

#[derive(Validate)]
#[validate(non_empty)]
pub struct Sample {
    pub series: String,

    #[validate(skip)]
    pub sequence: u64,
}

fn main() {
    let s = Sample::new("A".into(), 10);
    assert!(s.is_ok());
}
