//! Errors raised by the serialization engine.

use std::fmt::Display;

use getset::Getters;

/// Why the security gate refused a type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    thiserror::Error,
    displaydoc::Display,
)]
pub enum SecurityReason {
    /// the type is on the disallow list
    Disallowed,

    /// the type checker does not allow it
    NotAllowed,
}

/// Why a registration was refused.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    thiserror::Error,
    displaydoc::Display,
)]
pub enum RegistrationReason {
    /// already registered with id {existing}, cannot re-register with id {requested}
    IdConflict {
        /// The id the type already has.
        existing: u32,

        /// The id asked for.
        requested: u32,
    },

    /// id {id} is already taken by `{owner}`
    IdTaken {
        /// The contested id.
        id: u32,

        /// The type holding the id.
        owner: String,
    },

    /// id {id} does not fit in 24 bits
    IdOutOfRange {
        /// The rejected id.
        id: u32,
    },

    /// already registered by name, cannot re-register by id
    RegisteredByName,

    /// already registered by id {id}, cannot re-register by name
    RegisteredById {
        /// The id the type already has.
        id: u32,
    },

    /// a different shape is already registered under this name
    ShapeConflict,

    /// the type was never registered
    NotRegistered,
}

/// Summaries of the objects reconstructed before a read failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
pub struct ReadSnapshot {
    /// Retained summaries in reconstruction order.
    #[get = "pub"]
    objects: Vec<String>,

    /// Objects reconstructed in total, retained or not.
    #[get = "pub"]
    total: usize,
}

impl ReadSnapshot {
    pub(crate) const fn new(objects: Vec<String>, total: usize) -> Self {
        Self { objects, total }
    }
}

impl Display for ReadSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} objects reconstructed", self.total)?;

        if !self.objects.is_empty() {
            write!(f, ", retained: [{}]", self.objects.join(", "))?;
        }

        Ok(())
    }
}

/// The error type of every engine operation.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum Error {
    /// The buffer failed: truncated input, malformed varint, or a length
    /// that does not fit its encoding.
    #[error(transparent)]
    Buffer(#[from] fory_buffer::Error),

    /// Type metadata failed to build or decode.
    #[error(transparent)]
    Meta(#[from] fory_meta::Error),

    /// The security gate refused a type.
    #[error("type `{type_name}` is rejected: {reason}")]
    Security { type_name: String, reason: SecurityReason },

    /// A registration was refused.
    #[error("cannot register `{type_name}`: {reason}")]
    Registration { type_name: String, reason: RegistrationReason },

    /// A type has no wire identity and registration is required, or it could
    /// not be resolved on read.
    #[error("type `{type_name}` is not registered")]
    UnregisteredType { type_name: String },

    /// A type tag names no known type.
    #[error("unknown type tag {tag:#x}")]
    UnknownTypeTag { tag: u32 },

    /// The stream disagrees with the local description of a type.
    #[error("malformed schema for `{type_name}`: {message}")]
    MalformedSchema { type_name: String, message: String },

    /// A value does not have the declared type.
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A back-reference names an object that was never read.
    #[error("reference id {id} names no object read so far")]
    InvalidRefId { id: u32 },

    /// The stream header cannot be handled.
    #[error("unsupported stream: {reason}")]
    UnsupportedStream { reason: &'static str },

    /// The value graph nests deeper than allowed.
    #[error("value graph nests deeper than {max_depth} levels{hint}")]
    DepthExceeded { max_depth: usize, hint: &'static str },

    /// Full meta sharing needs a caller-owned session.
    #[error("full meta sharing requires a meta context supplied by the caller")]
    MissingMetaContext,

    /// A read failed; carries what was reconstructed up to that point.
    #[error("deserialization failed ({snapshot}): {source}")]
    ReadFailed {
        #[source]
        source: Box<Error>,
        snapshot: ReadSnapshot,
    },
}

impl Error {
    /// The innermost error, looking through [`Error::ReadFailed`].
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::ReadFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn mismatch(
        expected: impl Display,
        found: impl Display,
    ) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn schema(
        type_name: impl Display,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedSchema {
            type_name: type_name.to_string(),
            message: message.into(),
        }
    }
}

/// Shorthand for results of engine operations.
pub type Result<T> = std::result::Result<T, Error>;
