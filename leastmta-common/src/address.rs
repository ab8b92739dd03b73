//! Mail address handling.
//!
//! Addresses are only ever split, never interpreted: the domain is needed for
//! MX resolution and the local-part is carried along untouched.
//!
//! ```text
//! Mailbox      = Local-part "@" Domain      ; exactly one "@", both sides non-empty
//! Path         = "<" Mailbox ">"
//! Reverse-path = Path / "<>"
//! ```

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The input was empty.
    #[error("empty address")]
    Empty,

    /// The input did not contain an `@`.
    #[error("missing '@' separator in {0:?}")]
    MissingAtSign(String),

    /// The input contained more than one `@`.
    #[error("more than one '@' in {0:?}")]
    MultipleAtSigns(String),

    /// The part before the `@` was empty.
    #[error("empty local-part in {0:?}")]
    EmptyLocalPart(String),

    /// The part after the `@` was empty.
    #[error("empty domain in {0:?}")]
    EmptyDomain(String),

    /// A path was not enclosed in angle brackets.
    #[error("expected <address>, got {0:?}")]
    MissingBrackets(String),
}

/// A mailbox split into its local-part and domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mailbox {
    /// The part before the `@`
    pub local_part: String,
    /// The part after the `@`
    pub domain: String,
}

impl Mailbox {
    /// Consumes the mailbox, returning `(local_part, domain)`.
    #[must_use]
    pub fn into_parts(self) -> (String, String) {
        (self.local_part, self.domain)
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl FromStr for Mailbox {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Splits `address` into local-part and domain.
///
/// # Errors
///
/// Returns an [`AddressError`] unless `address` contains exactly one `@` with a
/// non-empty part on either side.
pub fn parse(address: &str) -> Result<Mailbox, AddressError> {
    if address.is_empty() {
        return Err(AddressError::Empty);
    }

    let mut parts = address.split('@');
    let (Some(local_part), Some(domain)) = (parts.next(), parts.next()) else {
        return Err(AddressError::MissingAtSign(address.to_string()));
    };

    if parts.next().is_some() {
        return Err(AddressError::MultipleAtSigns(address.to_string()));
    }
    if local_part.is_empty() {
        return Err(AddressError::EmptyLocalPart(address.to_string()));
    }
    if domain.is_empty() {
        return Err(AddressError::EmptyDomain(address.to_string()));
    }

    Ok(Mailbox {
        local_part: local_part.to_string(),
        domain: domain.to_string(),
    })
}

/// Strips the angle brackets from an SMTP path, returning the enclosed address.
///
/// `<>` yields an empty string (the null reverse-path). The enclosed address is
/// not validated here; callers decide whether they need a full [`Mailbox`].
///
/// # Errors
///
/// Returns [`AddressError::MissingBrackets`] if `input` is not of the form `<...>`.
pub fn strip_path(input: &str) -> Result<&str, AddressError> {
    let trimmed = input.trim();

    trimmed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .map(str::trim)
        .ok_or_else(|| AddressError::MissingBrackets(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn well_formed_addresses_split_at_the_at_sign() {
        for (input, local, domain) in [
            ("b@y.com", "b", "y.com"),
            ("first.last+tag@mail.example.org", "first.last+tag", "mail.example.org"),
            ("postmaster@[192.0.2.1]", "postmaster", "[192.0.2.1]"),
        ] {
            let mailbox = parse(input).unwrap();
            assert_eq!(mailbox.local_part, local);
            assert_eq!(mailbox.domain, domain);
            assert_eq!(mailbox.to_string(), input);
        }
    }

    #[test]
    fn addresses_without_exactly_one_at_sign_are_rejected() {
        assert_eq!(parse(""), Err(AddressError::Empty));
        assert!(matches!(parse("nobody"), Err(AddressError::MissingAtSign(_))));
        assert!(matches!(
            parse("a@b@c.com"),
            Err(AddressError::MultipleAtSigns(_))
        ));
        assert!(matches!(parse("@y.com"), Err(AddressError::EmptyLocalPart(_))));
        assert!(matches!(parse("b@"), Err(AddressError::EmptyDomain(_))));
        assert!(matches!(parse("@"), Err(AddressError::EmptyLocalPart(_))));
    }

    #[test]
    fn from_str_matches_parse() {
        let mailbox: Mailbox = "a@x.com".parse().unwrap();
        assert_eq!(
            mailbox.into_parts(),
            ("a".to_string(), "x.com".to_string())
        );
    }

    #[test]
    fn strip_path_handles_brackets_and_null_path() {
        assert_eq!(strip_path("<a@x.com>"), Ok("a@x.com"));
        assert_eq!(strip_path("  < a@x.com >  "), Ok("a@x.com"));
        assert_eq!(strip_path("<>"), Ok(""));
        assert!(matches!(
            strip_path("a@x.com"),
            Err(AddressError::MissingBrackets(_))
        ));
        assert!(matches!(
            strip_path("<a@x.com"),
            Err(AddressError::MissingBrackets(_))
        ));
    }
}
