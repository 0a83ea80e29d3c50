use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of frame")]
    UnexpectedEof,
    #[error("{0} trailing bytes after a fully decoded frame")]
    TrailingBytes(usize),
    #[error("length prefix {0} exceeds remaining buffer of {1} bytes")]
    LengthOutOfBounds(usize, usize),
    #[error("invalid utf-8 in varstring")]
    InvalidUtf8,
    #[error("invalid bool byte {0:#x}")]
    InvalidBool(u8),
    #[error("unknown frame discriminator {0:#x}")]
    UnknownDiscriminator(u8),
    #[error("unknown doc payload tag {0:#x}")]
    UnknownDocPayloadTag(u8),
    #[error("unknown rpc direction tag {0:#x}")]
    UnknownRpcDirection(u8),
    #[error("unknown file payload tag {0:#x}")]
    UnknownFilePayloadTag(u8),
    #[error("unsupported encrypted sub-codec version {0}")]
    UnknownSubCodecVersion(u64),
    #[error("varint exceeds 64 bits")]
    VarintTooLarge,
    #[error("invalid json payload: {0}")]
    InvalidJson(String),
    #[error("a table index of {0} has no matching client id (table has {1} entries)")]
    TableIndexOutOfRange(usize, usize),
}
