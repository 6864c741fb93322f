mod common;

use chrono::NaiveDate;
use nfse_core::rps::batch::{decode_record_line, BatchTextEncoder};
use nfse_core::rps::{
    BatchTotals, ContractorKind, DateRange, Money, ReceiptBatch, ReceiptKind, TaxRate, Taxation,
};
use proptest::prelude::*;
use proptest::sample::select;

fn encode_one(record: &nfse_core::rps::ServiceRecord) -> Vec<u8> {
    let range = DateRange::new(record.issue_date, record.issue_date).expect("range");
    let totals = BatchTotals::from_records(std::slice::from_ref(record)).expect("totals");
    let file = BatchTextEncoder::new(&common::provider())
        .encode(&range, &totals, std::slice::from_ref(record))
        .expect("encode");
    let line = file.lines().nth(1).expect("record line").to_vec();
    line
}

proptest! {
    #[test]
    fn record_line_reads_back_its_fields(
        series in "[A-Z0-9]{0,5}",
        number in 1u64..=999_999_999_999,
        day in 0u32..3650,
        kind in select(vec![ReceiptKind::Receipt, ReceiptKind::Mixed, ReceiptKind::Coupon]),
        taxation in select(vec![
            Taxation::InMunicipality,
            Taxation::OutOfMunicipality,
            Taxation::Exempt,
            Taxation::JudiciallySuspended,
        ]),
        services in 1u64..=999_999_999_999_999,
        deductions in 0u64..=999_999_999_999_999,
        rate in 0u16..=9999,
        withheld in any::<bool>(),
        contractor_kind in select(vec![ContractorKind::Individual, ContractorKind::Corporate]),
        name in "[A-Za-zçãéóÁ]{1,75}",
        city in "[A-Za-zãõ]{0,50}",
        description in "[A-Za-z0-9áê .,]{0,80}[a-z]",
    ) {
        let mut record = common::minimal_record();
        record.series = series.clone();
        record.number = number.to_string();
        record.issue_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Days::new(day.into());
        record.kind = kind;
        record.taxation = taxation;
        record.services_value = Money::from_cents(services);
        record.deductions_value = Money::from_cents(deductions);
        record.tax_rate = TaxRate::from_basis_points(rate).unwrap();
        record.tax_withheld = withheld;
        record.contractor.kind = contractor_kind;
        record.contractor.name = name.clone();
        record.contractor.address.city = Some(city.clone()).filter(|c| !c.is_empty());
        record.description = description.clone();

        let decoded = decode_record_line(&encode_one(&record)).unwrap();
        prop_assert_eq!(decoded.kind, kind);
        prop_assert_eq!(decoded.series, series);
        prop_assert_eq!(decoded.number.parse::<u64>().unwrap(), number);
        prop_assert_eq!(decoded.issue_date, record.issue_date);
        prop_assert_eq!(decoded.taxation, taxation);
        prop_assert_eq!(decoded.services_value.cents(), services);
        prop_assert_eq!(decoded.deductions_value.cents(), deductions);
        prop_assert_eq!(decoded.tax_rate.basis_points(), rate);
        prop_assert_eq!(decoded.tax_withheld, withheld);
        prop_assert_eq!(decoded.contractor_kind, contractor_kind);
        prop_assert_eq!(decoded.contractor_tax_number, "11222333000181");
        prop_assert_eq!(decoded.contractor_name, name);
        prop_assert_eq!(decoded.city, city);
        prop_assert_eq!(decoded.description, description);
    }
}

#[test]
fn zero_value_receipts_are_skipped_but_counted() {
    let mut skipped = common::minimal_record();
    skipped.services_value = Money::ZERO;
    let kept = common::minimal_record();
    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
    )
    .unwrap();
    let batch = ReceiptBatch::from_records(range, vec![skipped, kept]).unwrap();

    let file = BatchTextEncoder::new(&common::provider())
        .encode_batch(&batch)
        .unwrap();
    let lines: Vec<&[u8]> = file.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], b"1001396169242024050120240531");
    assert_eq!(lines[1][0], b'2');
    assert_eq!(lines[2], b"90000002000000000150000000000000000000");
    assert!(file.as_bytes().ends_with(b"\r\n"));
}

#[test]
fn description_line_breaks_become_pipes_in_latin1() {
    let mut record = common::minimal_record();
    record.description = "Serviço prestado\r\nem março".into();
    let line = encode_one(&record);
    let decoded = decode_record_line(&line).unwrap();
    assert_eq!(decoded.description, "Serviço prestado|em março");
    assert!(line.ends_with(b"Servi\xE7o prestado|em mar\xE7o"));
}
