//! Encode and decode error types.

/// Errors raised while decoding a value from the wire.
///
/// Every variant carries enough context to log the offending frame; the
/// decoders never substitute a default for malformed input.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The input ended before the value was complete.
    #[error("truncated input: {needed} more byte(s) needed")]
    Truncated {
        /// Lower bound on the number of missing bytes.
        needed: usize,
    },

    /// A value of a different shape was found where another was expected.
    #[error("expected {expected}, found {found}")]
    Unexpected {
        /// Shape the reader asked for.
        expected: &'static str,
        /// What was actually on the wire.
        found: String,
    },

    /// An array, object, or fixed-size blob had the wrong length.
    #[error("{what}: expected length {expected}, got {actual}")]
    LengthMismatch {
        /// The value being decoded.
        what: &'static str,
        /// Length required by the schema.
        expected: usize,
        /// Length found on the wire.
        actual: usize,
    },

    /// A string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// An integer did not fit the declared logical type.
    #[error("integer {value} does not fit in {target}")]
    IntegerOverflow {
        /// The decoded value.
        value: i128,
        /// Name of the target type.
        target: &'static str,
    },

    /// A discriminator held a value outside its enumeration.
    #[error("unknown {what} {value}")]
    UnknownValue {
        /// The enumeration being decoded.
        what: &'static str,
        /// The unrecognised value.
        value: i128,
    },

    /// The envelope was produced by a different protocol version.
    #[error("protocol version mismatch: expected {expected:#010x}, got {actual:#010x}")]
    VersionMismatch {
        /// Version of this build.
        expected: u32,
        /// Version found in the frame.
        actual: u32,
    },

    /// A named field was absent from a JSON object.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// The reader was driven in an order its input cannot satisfy.
    #[error("malformed decoder state: {0}")]
    Structure(&'static str),

    /// A reference was not a valid 16-byte identifier.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Bytes remained after a complete value was decoded.
    #[error("{0} trailing byte(s) after value")]
    TrailingBytes(usize),

    /// A length prefix announced a frame above the configured limit.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A binary field in a JSON document was not valid base64.
    #[error("invalid base64 in binary field: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The input was not well-formed JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecodeError {
    /// Returns `true` if more input could complete the value.
    ///
    /// Stream buffers use this to tell "wait for the next chunk" apart from
    /// a malformed frame.
    pub const fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    /// Shorthand for [`DecodeError::LengthMismatch`].
    pub(crate) const fn length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::LengthMismatch {
            what,
            expected,
            actual,
        }
    }

    /// Shorthand for [`DecodeError::UnknownValue`].
    pub(crate) fn unknown(what: &'static str, value: impl Into<i128>) -> Self {
        Self::UnknownValue {
            what,
            value: value.into(),
        }
    }
}

/// Errors raised while encoding a value.
///
/// An encode error always aborts the whole value; callers never see a
/// partially written buffer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// A message envelope without content cannot be sent.
    #[error("message has no content")]
    MissingContent,

    /// The envelope's type tag disagrees with its content.
    #[error("type tag {type_id} (response: {is_response}) does not match {content} content")]
    TagMismatch {
        /// Tag stored in the envelope.
        type_id: u32,
        /// Response flag stored in the envelope.
        is_response: bool,
        /// Name of the content variant.
        content: &'static str,
    },

    /// A string, blob, or collection is longer than the wire can express.
    #[error("{what} of length {len} exceeds the u32 limit")]
    TooLong {
        /// The value being encoded.
        what: &'static str,
        /// Its length.
        len: usize,
    },

    /// The MessagePack writer failed.
    #[error("msgpack write failed: {0}")]
    Write(#[from] rmp::encode::ValueWriteError),

    /// A property carries an option code that needs a structured value.
    #[error("option {0} cannot carry a scalar value")]
    InvalidProperty(u32),

    /// The encoder was driven in an order that does not form a value.
    #[error("malformed encoder state: {0}")]
    Structure(&'static str),

    /// JSON serialisation failed.
    #[error("JSON serialisation failed: {0}")]
    Json(#[from] serde_json::Error),
}
