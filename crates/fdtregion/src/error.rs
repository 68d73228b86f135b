use thiserror::Error;

/// Errors reported while reading a blob or walking its structure block.
///
/// All of these are fatal: the walk makes no attempt to skip malformed
/// input and resume. A paused walk (caller's output slice full) is not an
/// error; see [`RegionState::next_regions`](crate::RegionState::next_regions).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The header failed basic sanity checks (magic, size, section ranges).
    #[error("not a valid FDT blob: {0}")]
    BadBlob(&'static str),

    /// The tag stream is inconsistent with the header or with itself.
    #[error("malformed structure block near offset {0:#x}")]
    BadStructure(usize),

    /// A node path does not fit in the path buffer.
    #[error("node path does not fit in the path buffer")]
    NoSpace,

    /// Node nesting exceeds the fixed ancestor-stack bound.
    #[error("node nesting deeper than {} levels", crate::MAX_DEPTH)]
    TooDeep,

    /// The string table does not follow the structure block.
    #[error("string table does not follow the structure block")]
    BadLayout,

    /// The render sink refused a write.
    #[error("output write failed")]
    Write(#[from] core::fmt::Error),
}
