//! Multiplex frame tags.

use crate::error::ProtocolError;

/// Distinguishes the payload of a multiplexed frame once `MUX_ON` is
/// in effect. `Data` feeds the in-band byte stream that file-list and delta
/// traffic rides on; every other tag is delivered to the message sink.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// In-band payload bytes (file list, checksums, delta tokens).
    Data = 0,
    /// Informational message, shown to the user.
    Info = 1,
    /// A transfer error tied to a specific file; does not end the session.
    ErrorXfer = 2,
    /// A fatal session error. The writer flushes before sending this.
    Error = 3,
    /// A non-fatal warning.
    Warning = 4,
    /// A log line, typically mirrored to the daemon's own log sink.
    Log = 5,
    /// An I/O error report distinct from a protocol-level [`Tag::Error`].
    IoError = 6,
    /// Informs the peer that a requested file will not be sent.
    NoSend = 7,
    /// Acknowledges successful application of a file.
    Success = 8,
    /// Reports that a path was deleted (during delete-extraneous transfers).
    Deleted = 9,
    /// Carries a client-originated out-of-band message, including session
    /// abort notifications.
    Client = 10,
}

impl Tag {
    /// All tags, in ascending wire-value order.
    pub const ALL: [Self; 11] = [
        Self::Data,
        Self::Info,
        Self::ErrorXfer,
        Self::Error,
        Self::Warning,
        Self::Log,
        Self::IoError,
        Self::NoSend,
        Self::Success,
        Self::Deleted,
        Self::Client,
    ];

    /// The wire byte for this tag.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this tag carries in-band data rather than an out-of-band
    /// message.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Data)
    }
}

impl TryFrom<u8> for Tag {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::Data),
            1 => Ok(Self::Info),
            2 => Ok(Self::ErrorXfer),
            3 => Ok(Self::Error),
            4 => Ok(Self::Warning),
            5 => Ok(Self::Log),
            6 => Ok(Self::IoError),
            7 => Ok(Self::NoSend),
            8 => Ok(Self::Success),
            9 => Ok(Self::Deleted),
            10 => Ok(Self::Client),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_round_trips_through_its_wire_byte() {
        for tag in Tag::ALL {
            assert_eq!(Tag::try_from(tag.as_u8()).unwrap(), tag);
        }
    }

    #[test]
    fn unknown_byte_is_rejected() {
        let err = Tag::try_from(200).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownTag(200)));
    }

    #[test]
    fn only_data_carries_in_band_bytes() {
        for tag in Tag::ALL {
            assert_eq!(tag.is_data(), tag == Tag::Data);
        }
    }
}
