//! Binary-format decoding: a single linear pass over the section stream
//! producing a [`Module`](crate::module::Module) or a [`DecodeError`].
//! Decoding is pure; identical bytes always yield an identical result.

pub mod cursor;
pub mod leb128;
pub mod sections;

use thiserror::Error;

pub use sections::decode_module;

pub type Result<T> = core::result::Result<T, DecodeError>;

/// The input bytes are not a well-formed module.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Magic or version check failed; reported before any section parsing.
    #[error("bad module header: {msg}")]
    BadHeader { msg: &'static str },

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("LEB128 value overflows {bits} bits at offset {offset}")]
    Leb128Overflow { bits: u8, offset: usize },

    #[error("LEB128 encoding longer than {limit} bytes at offset {offset}")]
    Leb128TooLong { limit: u8, offset: usize },

    #[error("invalid UTF-8 in name at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("section id {id} out of order at offset {offset}")]
    SectionOutOfOrder { id: u8, offset: usize },

    #[error("duplicate section id {id} at offset {offset}")]
    DuplicateSection { id: u8, offset: usize },

    #[error("malformed module at offset {offset}: {msg}")]
    Malformed { offset: usize, msg: &'static str },
}
