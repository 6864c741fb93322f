//! Builtin validation rules.
//!
//! Every rule expands to a statement that inspects `value: &str` and returns
//! `Err(E::from(String))` on violation.

use proc_macro2::TokenStream;
use quote::quote;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Rule {
    NonEmpty,
    Digits,
    Latin1,
    NoLineBreaks,
    XmlChars,
    Letters,
    MaxLen(usize),
    ExactLen(usize),
}

impl Rule {
    pub(crate) fn parse(name: &str, arg: Option<usize>) -> Option<Self> {
        match (name, arg) {
            ("non_empty", None) => Some(Rule::NonEmpty),
            ("digits", None) => Some(Rule::Digits),
            ("latin1", None) => Some(Rule::Latin1),
            ("xml_chars", None) => Some(Rule::XmlChars),
            ("letters", None) => Some(Rule::Letters),
            ("no_line_breaks", None) => Some(Rule::NoLineBreaks),
            ("max_len", Some(n)) => Some(Rule::MaxLen(n)),
            ("exact_len", Some(n)) => Some(Rule::ExactLen(n)),
            _ => None,
        }
    }

    pub(crate) fn expand(&self, value: &TokenStream, field: &str) -> TokenStream {
        match self {
            Rule::NonEmpty => quote! {
                if #value.trim().is_empty() {
                    return Err(E::from(format!("{} must be non-empty", #field)));
                }
            },
            Rule::Digits => quote! {
                if !#value.chars().all(|c| c.is_ascii_digit()) {
                    return Err(E::from(format!("{} must contain only digits", #field)));
                }
            },
            Rule::Latin1 => quote! {
                if #value.chars().any(|c| (c as u32) > 0xFF) {
                    return Err(E::from(format!(
                        "{} must be representable in ISO-8859-1", #field
                    )));
                }
            },
            Rule::NoLineBreaks => quote! {
                if #value.contains(|c: char| c == '\n' || c == '\r') {
                    return Err(E::from(format!("{} must not contain line breaks", #field)));
                }
            },
            // Tab, LF and CR are the only C0 controls XML 1.0 allows.
            Rule::XmlChars => quote! {
                if #value.chars().any(|c| {
                    (c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r'))
                        || matches!(c, '\u{FFFE}' | '\u{FFFF}')
                }) {
                    return Err(E::from(format!(
                        "{} contains a character not allowed in XML", #field
                    )));
                }
            },
            Rule::Letters => quote! {
                if !#value.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(E::from(format!("{} must contain only letters", #field)));
                }
            },
            Rule::MaxLen(max) => quote! {
                if #value.chars().count() > #max {
                    return Err(E::from(format!(
                        "{} must be at most {} characters", #field, #max
                    )));
                }
            },
            Rule::ExactLen(len) => quote! {
                if #value.chars().count() != #len {
                    return Err(E::from(format!(
                        "{} must be exactly {} characters", #field, #len
                    )));
                }
            },
        }
    }
}
