//! The message data model: who a message is from, who it is for, and the
//! body exactly as it was submitted.

use std::sync::Arc;

use crate::address::{self, AddressError, Mailbox};

/// Sender/recipient pair routing a single message.
///
/// Both fields are non-empty once set and the recipient always splits into a
/// local-part and a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: String,
    recipient: Mailbox,
}

impl Envelope {
    /// Creates an envelope, validating the recipient.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] if the sender is empty or the recipient is
    /// not a well-formed `local@domain` address.
    pub fn new(sender: impl Into<String>, recipient: &str) -> Result<Self, AddressError> {
        let sender = sender.into();
        if sender.is_empty() {
            return Err(AddressError::Empty);
        }

        Ok(Self {
            sender,
            recipient: address::parse(recipient)?,
        })
    }

    /// Returns the sender address, as declared
    #[inline]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Returns the parsed recipient
    #[inline]
    pub const fn recipient(&self) -> &Mailbox {
        &self.recipient
    }

    /// Returns the domain whose mail exchangers receive this message
    #[inline]
    pub fn recipient_domain(&self) -> &str {
        &self.recipient.domain
    }
}

/// An envelope together with its fully buffered body.
///
/// The body is forwarded verbatim and never parsed.
#[derive(Debug, Clone)]
pub struct Message {
    pub envelope: Envelope,
    pub body: Arc<[u8]>,
}

impl Message {
    #[must_use]
    pub fn new(envelope: Envelope, body: impl Into<Arc<[u8]>>) -> Self {
        Self {
            envelope,
            body: body.into(),
        }
    }

    /// Size of the body in bytes, as declared in `MAIL FROM ... SIZE=`
    #[inline]
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn envelope_exposes_recipient_domain() {
        let envelope = Envelope::new("a@x.com", "b@y.com").unwrap();
        assert_eq!(envelope.sender(), "a@x.com");
        assert_eq!(envelope.recipient().local_part, "b");
        assert_eq!(envelope.recipient_domain(), "y.com");
    }

    #[test]
    fn envelope_rejects_empty_sender_and_bad_recipient() {
        assert_eq!(Envelope::new("", "b@y.com"), Err(AddressError::Empty));
        assert!(Envelope::new("a@x.com", "not-an-address").is_err());
    }

    #[test]
    fn message_size_is_body_length() {
        let envelope = Envelope::new("a@x.com", "b@y.com").unwrap();
        let message = Message::new(envelope, b"hello".to_vec());
        assert_eq!(message.size(), 5);
        assert_eq!(&*message.body, b"hello");
    }
}
