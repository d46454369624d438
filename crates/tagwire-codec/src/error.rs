use crate::tag::Tag;

/// Errors produced while encoding, decoding or resolving payload types.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input ended before a value was complete.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The tag on the wire differs from the receiving object's own tag.
    #[error("incompatible object type: expected tag {expected}, found {found}")]
    TagMismatch { expected: Tag, found: Tag },

    /// No type is registered under this tag.
    #[error("unregistered type tag {0}")]
    UnknownTag(Tag),

    /// The tag names an abstract base type with no constructor.
    #[error("type tag {0} is an abstract base type")]
    AbstractTag(Tag),

    /// A second registration for an existing tag.
    #[error("type tag {0} is already registered")]
    DuplicateTag(Tag),

    /// The tag on the wire is outside the requested base type's subtree.
    #[error("type tag {tag} is not derived from base tag {base}")]
    NotAssignable { base: Tag, tag: Tag },

    /// The process-wide registry was already installed or used.
    #[error("global type registry is already installed")]
    AlreadyInstalled,

    /// A length prefix does not fit this platform's address space.
    #[error("length prefix {0} exceeds addressable size")]
    LengthOverflow(u64),

    /// Structurally invalid input.
    #[error("invalid payload: {0}")]
    Invalid(String),

    /// Snapshot source or destination failed.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
