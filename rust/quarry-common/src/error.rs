use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn buffer_overrun(index: usize, len: usize) -> Error {
        ErrorKind::BufferOverrun { index, len }.into()
    }

    pub fn memory_exhausted(requested: usize, free: usize) -> Error {
        ErrorKind::MemoryExhausted { requested, free }.into()
    }

    pub fn memory_fragmented(requested: usize, free: usize) -> Error {
        ErrorKind::MemoryFragmented { requested, free }.into()
    }

    pub fn bookkeeping_exhausted(capacity: usize) -> Error {
        ErrorKind::BookkeepingExhausted { capacity }.into()
    }

    pub fn overaligned(alignment: usize, max: usize) -> Error {
        ErrorKind::Overaligned { alignment, max }.into()
    }

    pub fn invalid_free(address: *const u8) -> Error {
        ErrorKind::InvalidFree {
            address: address as usize,
        }
        .into()
    }

    pub fn out_of_memory(bytes: usize, alignment: usize) -> Error {
        ErrorKind::OutOfMemory { bytes, alignment }.into()
    }

    pub fn block_too_large(requested: usize, block_size: usize) -> Error {
        ErrorKind::BlockTooLarge {
            requested,
            block_size,
        }
        .into()
    }

    pub fn empty_pen() -> Error {
        ErrorKind::EmptyPen.into()
    }

    /// Returns `true` for the failures caused by running out of raw space,
    /// as opposed to running out of bookkeeping capacity.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MemoryExhausted { .. }
                | ErrorKind::MemoryFragmented { .. }
                | ErrorKind::OutOfMemory { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("buffer overrun: index {index} is not below length {len}")]
    BufferOverrun { index: usize, len: usize },

    #[error("out of free memory -- memory exhausted ({requested} requested, {free} free)")]
    MemoryExhausted { requested: usize, free: usize },

    #[error("out of free memory -- memory fragmentation ({requested} requested, {free} free)")]
    MemoryFragmented { requested: usize, free: usize },

    #[error("out of allocation bookkeeping slots (capacity {capacity})")]
    BookkeepingExhausted { capacity: usize },

    #[error("requested over-aligned memory: alignment {alignment} exceeds {max}")]
    Overaligned { alignment: usize, max: usize },

    #[error("bookkeeping entry for allocation not found at {address:#x}")]
    InvalidFree { address: usize },

    #[error("backing allocator failed to provide {bytes} bytes aligned to {alignment}")]
    OutOfMemory { bytes: usize, alignment: usize },

    #[error("request of {requested} bytes does not fit in a block of {block_size} bytes")]
    BlockTooLarge { requested: usize, block_size: usize },

    #[error("the holding pen is empty")]
    EmptyPen,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
