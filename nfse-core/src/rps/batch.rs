//! Fixed-width text layout for offline batch submission.
//!
//! The file is ISO-8859-1 with CR+LF line endings: a type `1` header, one type `2`
//! line per receipt with a positive services value, and a type `9` footer.
use super::format::{
    compact_date, flatten_lines, from_latin1, parse_compact_date, space_pad_left,
    space_pad_right, to_latin1, unrepresentable_in_latin1, zero_pad,
};
use super::{
    BatchTotals, ContractorKind, DateRange, Money, ReceiptBatch, ReceiptKind, ServiceRecord,
    TaxRate, Taxation, ValidationError,
};
use crate::config::ProviderIdentity;
use chrono::{NaiveDate, NaiveDateTime};
use std::{
    fs,
    ops::Range,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

const LINE_END: &[u8] = b"\r\n";
const LAYOUT_VERSION: &str = "001";

/// Width of every column before the variable-length description.
const FIXED_WIDTH: usize = 440;

#[derive(Debug, Error)]
pub enum BatchFileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to write batch file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record line: {reason}")]
    MalformedLine { reason: String },
}

/// Encoded batch text, ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    bytes: Vec<u8>,
}

impl BatchFile {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Lines without their CR+LF terminator.
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.bytes
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
    }

    /// Writes the file as `<dir>/YYYY-MM-DD_HHMM.txt`, creating `dir` when missing.
    pub fn write_to_dir(&self, dir: &Path, now: NaiveDateTime) -> Result<PathBuf, BatchFileError> {
        fs::create_dir_all(dir).map_err(|source| BatchFileError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!("{}.txt", now.format("%Y-%m-%d_%H%M")));
        fs::write(&path, &self.bytes).map_err(|source| BatchFileError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), bytes = self.bytes.len(), "batch file written");
        Ok(path)
    }
}

/// Encodes receipts into the text batch layout for one provider.
#[derive(Debug, Clone)]
pub struct BatchTextEncoder {
    provider_register: String,
}

impl BatchTextEncoder {
    pub fn new(provider: &ProviderIdentity) -> Self {
        Self {
            provider_register: provider.ccm().to_string(),
        }
    }

    pub fn encode_batch(&self, batch: &ReceiptBatch) -> Result<BatchFile, BatchFileError> {
        self.encode(&batch.range, &batch.totals, &batch.records)
    }

    /// Encodes header, body and footer.
    ///
    /// Receipts whose services value is zero are left out of the body, but the
    /// footer count is the number of receipts passed in.
    pub fn encode(
        &self,
        range: &DateRange,
        totals: &BatchTotals,
        records: &[ServiceRecord],
    ) -> Result<BatchFile, BatchFileError> {
        for (index, record) in records.iter().enumerate() {
            record.check().map_err(|source| ValidationError::Record {
                index,
                source: Box::new(source),
            })?;
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.header(range).as_bytes());
        bytes.extend_from_slice(LINE_END);

        let mut written = 0usize;
        for record in records {
            if record.services_value.is_zero() {
                warn!(
                    series = %record.series,
                    number = %record.number,
                    "skipping receipt without services value"
                );
                continue;
            }
            bytes.extend_from_slice(&record_line(record));
            bytes.extend_from_slice(LINE_END);
            written += 1;
        }

        let footer = format!(
            "9{}{}{}",
            zero_pad(&records.len().to_string(), 7),
            totals.services.fixed_width(),
            totals.deductions.fixed_width(),
        );
        bytes.extend_from_slice(footer.as_bytes());
        bytes.extend_from_slice(LINE_END);

        debug!(received = records.len(), written, "batch text encoded");
        Ok(BatchFile { bytes })
    }

    fn header(&self, range: &DateRange) -> String {
        format!(
            "1{LAYOUT_VERSION}{}{}{}",
            zero_pad(&self.provider_register, 8),
            compact_date(range.start()),
            compact_date(range.end()),
        )
    }
}

fn record_line(record: &ServiceRecord) -> Vec<u8> {
    let contractor = &record.contractor;
    let address = &contractor.address;
    let text = |value: &Option<String>| value.as_deref().unwrap_or("").to_string();

    let mut line = String::with_capacity(FIXED_WIDTH + record.description.len());
    line.push('2');
    line.push_str(&space_pad_right(record.kind.code(), 5));
    line.push_str(&space_pad_right(&record.series, 5));
    line.push_str(&zero_pad(&record.number, 12));
    line.push_str(&compact_date(record.issue_date));
    line.push(record.taxation.code());
    line.push_str(&record.services_value.fixed_width());
    line.push_str(&record.deductions_value.fixed_width());
    line.push_str(&zero_pad(&record.service_code, 5));
    line.push_str(&record.tax_rate.fixed_width());
    line.push(if record.tax_withheld { '1' } else { '2' });
    line.push(contractor.kind.code());
    line.push_str(&zero_pad(&contractor.federal_tax_number, 14));
    line.push_str(&zero_pad(&text(&contractor.taxpayer_register), 8));
    line.push_str(&"0".repeat(12));
    line.push_str(&space_pad_right(&contractor.name, 75));
    line.push_str(&space_pad_left(&text(&address.street_type), 3));
    line.push_str(&space_pad_right(&text(&address.street), 50));
    line.push_str(&space_pad_right(&text(&address.number), 10));
    line.push_str(&space_pad_right(&text(&address.complement), 30));
    line.push_str(&space_pad_right(&text(&address.district), 30));
    line.push_str(&space_pad_right(&text(&address.city), 50));
    line.push_str(&space_pad_right(&text(&address.state), 2));
    line.push_str(&zero_pad(&text(&address.zip), 8));
    line.push_str(&space_pad_right(&text(&contractor.email), 75));
    line.push_str(&flatten_lines(&record.description));

    let replaced = unrepresentable_in_latin1(&line);
    if replaced > 0 {
        warn!(
            series = %record.series,
            number = %record.number,
            replaced,
            "characters outside ISO-8859-1 written as '?'"
        );
    }
    to_latin1(&line)
}

/// Field values read back from a type `2` line.
///
/// Identifiers keep the zero padding they were written with; free text is
/// trimmed of its space padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLine {
    pub kind: ReceiptKind,
    pub series: String,
    pub number: String,
    pub issue_date: NaiveDate,
    pub taxation: Taxation,
    pub services_value: Money,
    pub deductions_value: Money,
    pub service_code: String,
    pub tax_rate: TaxRate,
    pub tax_withheld: bool,
    pub contractor_kind: ContractorKind,
    pub contractor_tax_number: String,
    pub contractor_register: String,
    pub contractor_name: String,
    pub street_type: String,
    pub street: String,
    pub street_number: String,
    pub complement: String,
    pub district: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub email: String,
    pub description: String,
}

struct Cursor<'a> {
    line: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, width: usize) -> Result<String, BatchFileError> {
        let range: Range<usize> = self.pos..self.pos + width;
        let bytes = self.line.get(range).ok_or_else(|| BatchFileError::MalformedLine {
            reason: format!("line ends before column {}", self.pos + width),
        })?;
        self.pos += width;
        Ok(from_latin1(bytes))
    }

    fn text(&mut self, width: usize) -> Result<String, BatchFileError> {
        Ok(self.take(width)?.trim().to_string())
    }

    fn rest(&mut self) -> String {
        let rest = from_latin1(self.line.get(self.pos..).unwrap_or_default());
        self.pos = self.line.len();
        rest
    }
}

fn malformed(reason: impl Into<String>) -> BatchFileError {
    BatchFileError::MalformedLine {
        reason: reason.into(),
    }
}

fn single_char(value: &str) -> char {
    value.chars().next().unwrap_or(' ')
}

/// Parses a type `2` line, without its CR+LF terminator.
pub fn decode_record_line(line: &[u8]) -> Result<RecordLine, BatchFileError> {
    if line.len() < FIXED_WIDTH {
        return Err(malformed(format!(
            "expected at least {FIXED_WIDTH} columns, got {}",
            line.len()
        )));
    }
    let mut cursor = Cursor { line, pos: 0 };
    if cursor.take(1)? != "2" {
        return Err(malformed("not a receipt line"));
    }

    let kind_code = cursor.text(5)?;
    let kind = ReceiptKind::from_code(&kind_code)
        .ok_or_else(|| malformed(format!("unknown receipt kind '{kind_code}'")))?;
    let series = cursor.text(5)?;
    let number = cursor.take(12)?;
    let date_text = cursor.take(8)?;
    let issue_date = parse_compact_date(&date_text)
        .ok_or_else(|| malformed(format!("invalid issue date '{date_text}'")))?;
    let taxation_code = single_char(&cursor.take(1)?);
    let taxation = Taxation::from_code(taxation_code)
        .ok_or_else(|| malformed(format!("unknown taxation '{taxation_code}'")))?;
    let services_value = parse_cents(&cursor.take(15)?)?;
    let deductions_value = parse_cents(&cursor.take(15)?)?;
    let service_code = cursor.take(5)?;
    let rate_text = cursor.take(4)?;
    let tax_rate = rate_text
        .parse::<u16>()
        .map_err(|_| malformed(format!("invalid tax rate '{rate_text}'")))
        .and_then(|bp| TaxRate::from_basis_points(bp).map_err(BatchFileError::from))?;
    let tax_withheld = match cursor.take(1)?.as_str() {
        "1" => true,
        "2" => false,
        other => return Err(malformed(format!("invalid withheld flag '{other}'"))),
    };
    let kind_flag = single_char(&cursor.take(1)?);
    let contractor_kind = ContractorKind::from_code(kind_flag)
        .ok_or_else(|| malformed(format!("invalid contractor type '{kind_flag}'")))?;
    let contractor_tax_number = cursor.take(14)?;
    let contractor_register = cursor.take(8)?;
    cursor.take(12)?;

    Ok(RecordLine {
        kind,
        series,
        number,
        issue_date,
        taxation,
        services_value,
        deductions_value,
        service_code,
        tax_rate,
        tax_withheld,
        contractor_kind,
        contractor_tax_number,
        contractor_register,
        contractor_name: cursor.text(75)?,
        street_type: cursor.text(3)?,
        street: cursor.text(50)?,
        street_number: cursor.text(10)?,
        complement: cursor.text(30)?,
        district: cursor.text(30)?,
        city: cursor.text(50)?,
        state: cursor.text(2)?,
        zip: cursor.take(8)?,
        email: cursor.text(75)?,
        description: cursor.rest(),
    })
}

fn parse_cents(value: &str) -> Result<Money, BatchFileError> {
    value
        .parse::<u64>()
        .map(Money::from_cents)
        .map_err(|_| malformed(format!("invalid amount '{value}'")))
}
