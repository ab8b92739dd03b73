use core::fmt::{self, Display, Formatter};
use std::collections::HashMap;

use leastmta_common::address;
use thiserror::Error;

/// ESMTP parameters of a `MAIL FROM` command (RFC 5321 Section 3.3).
///
/// Keys are stored upper-cased, so lookups are case-insensitive.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    params: HashMap<String, Option<String>>,
}

impl MailParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `KEY=VALUE` and `FLAG` tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is repeated or `SIZE` is not a
    /// positive integer.
    pub fn from_params_str(params_str: &str) -> Result<Self, String> {
        let mut params = Self::new();

        for token in params_str.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .map_or((token, None), |(key, value)| (key, Some(value.to_string())));
            let key = key.to_ascii_uppercase();

            if params.has(&key) {
                return Err(format!("Duplicate parameter '{key}' not allowed"));
            }

            if key == "SIZE" {
                match value.as_deref().map(str::parse::<usize>) {
                    Some(Ok(0)) => return Err(String::from("SIZE=0 is not allowed")),
                    Some(Ok(_)) => {}
                    _ => {
                        return Err(format!(
                            "Invalid SIZE value: {}",
                            value.as_deref().unwrap_or_default()
                        ));
                    }
                }
            }

            params.params.insert(key, value);
        }

        Ok(params)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.params
            .insert(key.to_ascii_uppercase(), Some(value.into()));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_ascii_uppercase())?.as_deref()
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(&key.to_ascii_uppercase())
    }

    /// The declared message size (RFC 1870), if any.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE")?.parse().ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Display for MailParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = self.params.keys().collect::<Vec<_>>();
        keys.sort();

        for (idx, key) in keys.into_iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            match &self.params[key] {
                None => f.write_str(key)?,
                Some(value) => write!(f, "{key}={value}")?,
            }
        }
        Ok(())
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl HeloVariant {
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Ehlo(id) | Self::Helo(id) => id,
        }
    }
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

/// Why a command line couldn't be turned into a [`Command`].
#[derive(Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Maps to `500`.
    #[error("Syntax error, command unrecognized")]
    Unrecognized(String),

    /// A known verb with bad arguments. Maps to `501`.
    #[error("{0}")]
    Syntax(String),
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// An empty reverse-path is the null sender of RFC 5321.
    MailFrom(String, MailParameters),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    StartTls,
    Auth {
        mechanism: String,
        initial_response: Option<String>,
    },
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(variant) => write!(fmt, "{variant} {}", variant.identity()),
            Self::MailFrom(from, params) if params.is_empty() => write!(fmt, "MAIL FROM:<{from}>"),
            Self::MailFrom(from, params) => write!(fmt, "MAIL FROM:<{from}> {params}"),
            Self::RcptTo(to) => write!(fmt, "RCPT TO:<{to}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            // Never echo credentials.
            Self::Auth { mechanism, .. } => write!(fmt, "AUTH {mechanism}"),
        }
    }
}

fn strip_verb<'a>(line: &'a str, verb: &str) -> Option<&'a str> {
    line.get(..verb.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(verb))
        .map(|_| &line[verb.len()..])
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if let Some(rest) = strip_verb(trimmed, "MAIL FROM:") {
            let rest = rest.trim();
            let (path, params) = match rest.find('>') {
                Some(end) => rest.split_at(end + 1),
                None => (rest, ""),
            };

            let from = address::strip_path(path)
                .map_err(|err| CommandError::Syntax(format!("Syntax error in MAIL FROM: {err}")))?;
            let params = MailParameters::from_params_str(params).map_err(CommandError::Syntax)?;

            return Ok(Self::MailFrom(from.to_string(), params));
        }

        if let Some(rest) = strip_verb(trimmed, "RCPT TO:") {
            let to = address::strip_path(rest)
                .map_err(|err| CommandError::Syntax(format!("Syntax error in RCPT TO: {err}")))?;
            if to.is_empty() {
                return Err(CommandError::Syntax(String::from(
                    "Syntax error in RCPT TO: empty forward-path",
                )));
            }

            return Ok(Self::RcptTo(to.to_string()));
        }

        let (verb, args) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(verb, args)| (verb, args.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" | "HELO" if args.is_empty() => Err(CommandError::Syntax(String::from(
                "Domain/address argument required",
            ))),
            "EHLO" => Ok(Self::Helo(HeloVariant::Ehlo(args.to_string()))),
            "HELO" => Ok(Self::Helo(HeloVariant::Helo(args.to_string()))),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            "STARTTLS" => Ok(Self::StartTls),
            "AUTH" => {
                let mut parts = args.split_whitespace();
                let mechanism = parts
                    .next()
                    .ok_or_else(|| CommandError::Syntax(String::from("Missing AUTH mechanism")))?
                    .to_ascii_uppercase();

                Ok(Self::Auth {
                    mechanism,
                    initial_response: parts.next().map(str::to_string),
                })
            }
            "MAIL" | "RCPT" => Err(CommandError::Syntax(format!(
                "Syntax error in parameters or arguments: {trimmed}"
            ))),
            _ => Err(CommandError::Unrecognized(trimmed.to_string())),
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = CommandError;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| {
                Err(CommandError::Unrecognized(
                    "Unable to interpret command".to_string(),
                ))
            },
            Self::try_from,
        )
    }
}
