use core::fmt::{self, Display};

/// Service extensions advertised in the `EHLO` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// RFC 3207
    StartTls,

    /// RFC 6152
    EightBitMime,

    /// RFC 1870. Zero means no limit is announced.
    Size(usize),

    /// RFC 4954, with the mechanisms on offer.
    Auth(&'static [&'static str]),
}

/// The SASL mechanisms the server implements.
pub const AUTH_MECHANISMS: &[&str] = &["PLAIN", "LOGIN"];

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::StartTls => fmt.write_str("STARTTLS"),
            Self::EightBitMime => fmt.write_str("8BITMIME"),
            Self::Size(0) => fmt.write_str("SIZE"),
            Self::Size(max) => write!(fmt, "SIZE {max}"),
            Self::Auth(mechanisms) => write!(fmt, "AUTH {}", mechanisms.join(" ")),
        }
    }
}
