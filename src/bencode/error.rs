use thiserror::Error;

/// Errors produced while decoding bencode.
///
/// Encoding is infallible; only the decoder can reject input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer is empty, has leading zeros, or overflows i64.
    #[error("invalid integer")]
    InvalidInteger,

    /// Byte-string length prefix is not a valid number.
    #[error("invalid string length")]
    InvalidLength,

    /// Dictionary key is not a byte string.
    #[error("dictionary key is not a byte string")]
    InvalidKey,

    /// Encountered a byte that cannot start a value.
    #[error("unexpected byte: 0x{0:02x}")]
    UnexpectedByte(u8),

    /// Extra data after the value where none is allowed.
    #[error("trailing data after value")]
    TrailingData,

    /// Recursion limit exceeded.
    #[error("nesting too deep")]
    NestingTooDeep,
}
