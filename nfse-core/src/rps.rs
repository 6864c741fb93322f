//! Service receipt (RPS) domain types.
//!
//! A [`ServiceRecord`] is the provisional receipt the provider issues before the
//! municipality converts it into an invoice. Records are plain values: the
//! document builder and the batch encoder only ever read them.
pub mod batch;
pub mod format;

use chrono::NaiveDate;
use nfse_derive::Validate;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Largest value representable in a 15 digit cents field.
pub const MAX_MONEY_CENTS: u64 = 999_999_999_999_999;

/// A request object violates a field-width or required-field rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0}")]
    Field(String),
    #[error("invalid amount '{input}': {reason}")]
    Amount { input: String, reason: &'static str },
    #[error("invalid tax rate '{input}': {reason}")]
    TaxRate { input: String, reason: &'static str },
    #[error("{field} exceeds the 15 digit cents field")]
    AmountTooLarge { field: &'static str },
    #[error("date range starts on {start} but ends on {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("batch contains no receipts")]
    EmptyBatch,
    #[error("cancellation needs at least one invoice number")]
    NothingToCancel,
    #[error("query must name an invoice, a receipt, or both")]
    EmptyQuery,
    #[error("page number starts at 1")]
    PageOutOfRange,
    #[error("record {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

impl From<String> for ValidationError {
    fn from(message: String) -> Self {
        ValidationError::Field(message)
    }
}

/// Amount of money held as integer cents.
///
/// # Examples
/// ```rust
/// use nfse_core::rps::Money;
///
/// let value: Money = "1234.5".parse()?;
/// assert_eq!(value.cents(), 123450);
/// assert_eq!(value.to_string(), "1234.50");
/// assert_eq!(value.fixed_width(), "000000000123450");
/// # Ok::<(), nfse_core::rps::ValidationError>(())
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: u64) -> Self {
        Money(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Cents, zero padded to the 15 columns used by signatures and text files.
    pub fn fixed_width(self) -> String {
        format!("{:015}", self.0)
    }

    fn fits_fixed_width(self) -> bool {
        self.0 <= MAX_MONEY_CENTS
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = |reason| ValidationError::Amount {
            input: input.to_string(),
            reason,
        };
        let trimmed = input.trim();
        let (units, fraction) = match trimmed.split_once('.') {
            Some((units, fraction)) => (units, fraction),
            None => (trimmed, ""),
        };
        if units.is_empty() || !units.chars().all(|c| c.is_ascii_digit()) {
            return Err(err("expected a non-negative decimal number"));
        }
        if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(err("at most two fractional digits"));
        }
        let units: u64 = units.parse().map_err(|_| err("amount too large"))?;
        let mut cents_text = fraction.to_string();
        while cents_text.len() < 2 {
            cents_text.push('0');
        }
        let cents: u64 = cents_text.parse().map_err(|_| err("invalid cents"))?;
        units
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .map(Money)
            .ok_or_else(|| err("amount too large"))
    }
}

impl TryFrom<String> for Money {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Money> for String {
    fn from(value: Money) -> Self {
        value.to_string()
    }
}

/// Service tax rate in basis points (`500` is 5%).
///
/// # Examples
/// ```rust
/// use nfse_core::rps::TaxRate;
///
/// let rate: TaxRate = "5".parse()?;
/// assert_eq!(rate.as_fraction(), "0.0500");
/// assert_eq!(rate.fixed_width(), "0500");
/// # Ok::<(), nfse_core::rps::ValidationError>(())
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxRate(u16);

impl TaxRate {
    const MAX_BASIS_POINTS: u16 = 9_999;

    pub fn from_basis_points(basis_points: u16) -> Result<Self, ValidationError> {
        if basis_points > Self::MAX_BASIS_POINTS {
            return Err(ValidationError::TaxRate {
                input: basis_points.to_string(),
                reason: "must be below 100%",
            });
        }
        Ok(TaxRate(basis_points))
    }

    pub const fn basis_points(self) -> u16 {
        self.0
    }

    /// Rate as a fraction with four decimals, the form the webservice expects.
    pub fn as_fraction(self) -> String {
        format!("{}.{:04}", self.0 / 10_000, self.0 % 10_000)
    }

    /// Percentage digits without separator, four columns wide.
    pub fn fixed_width(self) -> String {
        format!("{:04}", self.0)
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for TaxRate {
    type Err = ValidationError;

    /// Parses a percentage such as `"5"`, `"2.5"` or `"5.00"`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let percent: Money = input.parse().map_err(|_| ValidationError::TaxRate {
            input: input.to_string(),
            reason: "expected a percentage with at most two decimals",
        })?;
        let basis_points =
            u16::try_from(percent.cents()).map_err(|_| ValidationError::TaxRate {
                input: input.to_string(),
                reason: "must be below 100%",
            })?;
        TaxRate::from_basis_points(basis_points)
    }
}

impl TryFrom<String> for TaxRate {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaxRate> for String {
    fn from(value: TaxRate) -> Self {
        value.to_string()
    }
}

/// Kind of receipt being converted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    #[default]
    Receipt,
    /// Receipt originating from a mixed goods and services invoice.
    Mixed,
    Coupon,
}

impl ReceiptKind {
    pub fn code(self) -> &'static str {
        match self {
            ReceiptKind::Receipt => "RPS",
            ReceiptKind::Mixed => "RPS-M",
            ReceiptKind::Coupon => "RPS-C",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "RPS" => Some(ReceiptKind::Receipt),
            "RPS-M" => Some(ReceiptKind::Mixed),
            "RPS-C" => Some(ReceiptKind::Coupon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    #[default]
    Normal,
    Cancelled,
    Lost,
}

impl ReceiptStatus {
    pub fn code(self) -> char {
        match self {
            ReceiptStatus::Normal => 'N',
            ReceiptStatus::Cancelled => 'C',
            ReceiptStatus::Lost => 'E',
        }
    }
}

/// Where the service tax is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Taxation {
    InMunicipality,
    OutOfMunicipality,
    Exempt,
    JudiciallySuspended,
}

impl Taxation {
    pub fn code(self) -> char {
        match self {
            Taxation::InMunicipality => 'T',
            Taxation::OutOfMunicipality => 'F',
            Taxation::Exempt => 'I',
            Taxation::JudiciallySuspended => 'J',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'T' => Some(Taxation::InMunicipality),
            'F' => Some(Taxation::OutOfMunicipality),
            'I' => Some(Taxation::Exempt),
            'J' => Some(Taxation::JudiciallySuspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractorKind {
    #[default]
    Corporate,
    Individual,
}

impl ContractorKind {
    /// Flag shared by the receipt signature and the text layout.
    pub fn code(self) -> char {
        match self {
            ContractorKind::Individual => '1',
            ContractorKind::Corporate => '2',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            '1' => Some(ContractorKind::Individual),
            '2' => Some(ContractorKind::Corporate),
            _ => None,
        }
    }
}

/// Contractor postal address. Only the text batch layout carries it.
#[derive(Validate, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
#[serde(default)]
pub struct Address {
    /// Street type abbreviation such as `Rua` or `Av`.
    #[validate(max_len = 3, no_line_breaks, xml_chars)]
    pub street_type: Option<String>,
    #[validate(max_len = 50, no_line_breaks, xml_chars)]
    pub street: Option<String>,
    #[validate(max_len = 10, no_line_breaks, xml_chars)]
    pub number: Option<String>,
    #[validate(max_len = 30, no_line_breaks, xml_chars)]
    pub complement: Option<String>,
    #[validate(max_len = 30, no_line_breaks, xml_chars)]
    pub district: Option<String>,
    #[validate(max_len = 50, no_line_breaks, xml_chars)]
    pub city: Option<String>,
    #[validate(letters, exact_len = 2)]
    pub state: Option<String>,
    #[validate(digits, max_len = 8)]
    pub zip: Option<String>,
}

/// The party the service was rendered to.
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
pub struct Contractor {
    #[serde(default)]
    pub kind: ContractorKind,
    /// CPF or CNPJ digits.
    #[validate(non_empty, digits, max_len = 14)]
    pub federal_tax_number: String,
    /// Municipal register (CCM), when the contractor has one.
    #[validate(digits, max_len = 8)]
    #[serde(default)]
    pub taxpayer_register: Option<String>,
    #[validate(non_empty, no_line_breaks, xml_chars, max_len = 75)]
    pub name: String,
    #[serde(default)]
    pub address: Address,
    #[validate(no_line_breaks, xml_chars, max_len = 75)]
    #[serde(default)]
    pub email: Option<String>,
}

/// One provisional service receipt.
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
pub struct ServiceRecord {
    /// Provider CCM.
    #[validate(non_empty, digits, max_len = 8)]
    pub provider_register: String,
    #[validate(no_line_breaks, xml_chars, max_len = 5)]
    pub series: String,
    #[validate(non_empty, digits, max_len = 12)]
    pub number: String,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub kind: ReceiptKind,
    #[serde(default)]
    pub status: ReceiptStatus,
    pub taxation: Taxation,
    pub services_value: Money,
    #[serde(default)]
    pub deductions_value: Money,
    #[validate(non_empty, digits, max_len = 5)]
    pub service_code: String,
    pub tax_rate: TaxRate,
    #[serde(default)]
    pub tax_withheld: bool,
    #[validate(non_empty, xml_chars, max_len = 2000)]
    pub description: String,
    pub contractor: Contractor,
}

impl ServiceRecord {
    /// Runs the field rules of the record, its contractor and the contractor address.
    pub fn check(&self) -> Result<(), ValidationError> {
        self.validate()?;
        self.contractor.validate()?;
        self.contractor.address.validate()?;
        if !self.services_value.fits_fixed_width() {
            return Err(ValidationError::AmountTooLarge {
                field: "services_value",
            });
        }
        if !self.deductions_value.fits_fixed_width() {
            return Err(ValidationError::AmountTooLarge {
                field: "deductions_value",
            });
        }
        Ok(())
    }
}

/// Inclusive range of issue dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = ValidationError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// Aggregate values declared for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTotals {
    pub services: Money,
    #[serde(default)]
    pub deductions: Money,
}

impl BatchTotals {
    /// Sums the services and deductions values of `records`.
    pub fn from_records(records: &[ServiceRecord]) -> Result<Self, ValidationError> {
        records.iter().try_fold(BatchTotals::default(), |acc, record| {
            let services = acc
                .services
                .checked_add(record.services_value)
                .filter(|m| m.fits_fixed_width())
                .ok_or(ValidationError::AmountTooLarge { field: "services total" })?;
            let deductions = acc
                .deductions
                .checked_add(record.deductions_value)
                .filter(|m| m.fits_fixed_width())
                .ok_or(ValidationError::AmountTooLarge {
                    field: "deductions total",
                })?;
            Ok(BatchTotals {
                services,
                deductions,
            })
        })
    }
}

/// Receipts submitted together, with the range and totals the caller declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptBatch {
    pub range: DateRange,
    pub totals: BatchTotals,
    pub records: Vec<ServiceRecord>,
}

impl ReceiptBatch {
    /// Builds a batch whose totals are summed from the records.
    pub fn from_records(
        range: DateRange,
        records: Vec<ServiceRecord>,
    ) -> Result<Self, ValidationError> {
        let totals = BatchTotals::from_records(&records)?;
        Ok(Self {
            range,
            totals,
            records,
        })
    }

    /// Checks every record; any failure rejects the whole batch.
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.records.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        if !self.totals.services.fits_fixed_width() || !self.totals.deductions.fits_fixed_width()
        {
            return Err(ValidationError::AmountTooLarge { field: "totals" });
        }
        for (index, record) in self.records.iter().enumerate() {
            record.check().map_err(|source| ValidationError::Record {
                index,
                source: Box::new(source),
            })?;
        }
        Ok(())
    }
}
