//! Fixed-width field formatting shared by signatures, XML rendering and the text layout.
use chrono::NaiveDate;

/// Left-pads with zeros to `width`, like `%0Ns`. Longer input is kept as is.
pub fn zero_pad(value: &str, width: usize) -> String {
    format!("{value:0>width$}")
}

/// Right-pads with spaces to `width`, like `%-Ns`.
pub fn space_pad_right(value: &str, width: usize) -> String {
    format!("{value:<width$}")
}

/// Left-pads with spaces to `width`, like `%Ns`.
pub fn space_pad_left(value: &str, width: usize) -> String {
    format!("{value:>width$}")
}

/// `YYYYMMDD`
pub fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `YYYY-MM-DD`
pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_compact_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}

/// Replaces line breaks with `|` so free text stays on one line.
pub fn flatten_lines(value: &str) -> String {
    value.replace("\r\n", "|").replace(['\n', '\r'], "|")
}

/// Transliterates to ISO-8859-1, one byte per char, `?` for anything outside it.
pub fn to_latin1(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Number of chars [`to_latin1`] would replace with `?`.
pub fn unrepresentable_in_latin1(value: &str) -> usize {
    value.chars().filter(|&c| u32::from(c) > 0xFF).count()
}

pub fn from_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
