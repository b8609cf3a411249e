use chain_history::{EpochNo, SlotNo};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Which end of an iterator range a complaint is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorBound {
    Start,
    End,
}

impl fmt::Display for IteratorBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IteratorBound::Start => write!(f, "start"),
            IteratorBound::End => write!(f, "end"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // -- User errors: contract violations. The database stays open. --
    #[error("append to slot {slot} at or before the tip slot {tip}")]
    AppendToSlotInThePast { slot: SlotNo, tip: SlotNo },
    #[error("append of an EBB for epoch {epoch} at or before the current epoch {current}")]
    AppendToEbbInThePast { epoch: EpochNo, current: EpochNo },
    #[error("slot {slot} is its epoch's boundary-block slot and cannot hold a regular block")]
    AppendToEbbSlot { slot: SlotNo },
    #[error("read of slot {slot} past the tip")]
    ReadFutureSlot { slot: SlotNo, tip: Option<SlotNo> },
    #[error("read of an EBB for epoch {epoch} past the current epoch")]
    ReadFutureEbb { epoch: EpochNo, current: Option<EpochNo> },
    #[error("invalid iterator range: from slot {from} to slot {to}")]
    InvalidIteratorRange { from: SlotNo, to: SlotNo },
    #[error("iterator {bound} bound at slot {slot} holds no entry")]
    IteratorBoundMissing { bound: IteratorBound, slot: SlotNo },
    #[error("cannot truncate while {0} iterators are open")]
    OpenIterators(usize),
    #[error("the database is closed")]
    ClosedDb,
    #[error("the database is already open")]
    OpenDb,

    // -- Unexpected errors: corruption or I/O. Hitting one of these during
    // a write closes the database; the caller must reopen with a
    // validation policy. --
    #[error("file system error on {path}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checksum mismatch in epoch {epoch} at relative slot {relative_slot}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        epoch: EpochNo,
        relative_slot: u64,
        expected: u32,
        actual: u32,
    },
    #[error("invalid primary index for epoch {epoch}: {reason}")]
    InvalidPrimaryIndex { epoch: EpochNo, reason: &'static str },
    #[error("invalid secondary index for epoch {epoch}: {reason}")]
    InvalidSecondaryIndex { epoch: EpochNo, reason: &'static str },
    #[error("missing epoch file for epoch {epoch}")]
    MissingEpochFile { epoch: EpochNo },
    #[error("invalid block in epoch {epoch} at offset {offset}: {reason}")]
    InvalidBlock {
        epoch: EpochNo,
        offset: u64,
        reason: String,
    },
    #[error("epoch geometry lookup failed")]
    EpochGeometry(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Contract violations are reported and leave the database open; any
    /// other error during a write closes it.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::AppendToSlotInThePast { .. }
                | Error::AppendToEbbInThePast { .. }
                | Error::AppendToEbbSlot { .. }
                | Error::ReadFutureSlot { .. }
                | Error::ReadFutureEbb { .. }
                | Error::InvalidIteratorRange { .. }
                | Error::IteratorBoundMissing { .. }
                | Error::OpenIterators(_)
                | Error::ClosedDb
                | Error::OpenDb
        )
    }

    pub(crate) fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::FileSystem {
            path: path.into(),
            source,
        }
    }
}
