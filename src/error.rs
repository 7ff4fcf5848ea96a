//! CouplingError: unified error type for mesh-couple public APIs.
//!
//! Every fatal condition in the runtime surfaces as one of these variants;
//! the diagnostic always names the offending participant, rank or parameter
//! so that an aborted run can be traced without a debugger. Non-convergence
//! is deliberately *not* represented here: it is a numeric warning, logged
//! and survived (see [`crate::cplscheme`]).

use crate::mesh::{DataId, MeshId};
use thiserror::Error;

/// Unified error type for coupling operations.
#[derive(Debug, Error)]
pub enum CouplingError {
    /// Invalid or inconsistent configuration, detected at load time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Participants disagree on an expected message. Indicates version or
    /// configuration skew between the coupled codes.
    #[error("protocol mismatch with `{peer}`: expected {expected}, got {got}")]
    Protocol {
        peer: String,
        expected: String,
        got: String,
    },

    /// I/O failure on a channel. The peer process is assumed gone; the
    /// coupling cannot recover from a lost participant.
    #[error("transport failure on channel to `{peer}`: {source}")]
    Transport {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    /// The remote endpoint closed the channel mid-message.
    #[error("channel to `{peer}` closed unexpectedly")]
    ChannelClosed { peer: String },

    /// The solver violated the API contract.
    #[error("usage error in participant `{participant}`: {reason}")]
    Usage { participant: String, reason: String },

    /// No mesh registered under this id.
    #[error("mesh {0:?} is not registered")]
    MissingMesh(MeshId),

    /// No data field with this id on the given mesh.
    #[error("data {data:?} not found on mesh {mesh:?}")]
    UnknownData { mesh: MeshId, data: DataId },

    /// Mesh dimensionality differs between the participants.
    #[error("mesh `{mesh}` is {local}-dimensional here, peer announced {remote}")]
    DimensionMismatch {
        mesh: String,
        local: usize,
        remote: usize,
    },

    /// A value buffer has the wrong length for its mesh and dimension.
    #[error("data {data:?}: buffer holds {got} values, expected {expected}")]
    BufferSizeMismatch {
        data: DataId,
        expected: usize,
        got: usize,
    },

    /// A collective produced a payload of unexpected size for one rank.
    #[error("rank {rank}: collective payload of {got} bytes, expected {expected}")]
    CollectiveSizeMismatch {
        rank: usize,
        expected: usize,
        got: usize,
    },

    /// An operation requires a partitioned mesh but the distribution is
    /// still empty.
    #[error("mesh {0:?} has no vertex distribution; run partitioning first")]
    NotPartitioned(MeshId),

    /// The routing table has no entry for a rank that data arrived from.
    #[error("no communication-map entry for remote rank {0}")]
    UnknownRemoteRank(usize),

    /// A mesh construction invariant was violated.
    #[error("mesh `{mesh}`: {reason}")]
    MeshInvariant { mesh: String, reason: String },
}

impl CouplingError {
    /// Shorthand for transport failures, used by every channel backend.
    pub fn transport(peer: impl Into<String>, source: std::io::Error) -> Self {
        CouplingError::Transport {
            peer: peer.into(),
            source,
        }
    }

    /// Shorthand for usage errors raised by the solver-facing API.
    pub fn usage(participant: impl Into<String>, reason: impl Into<String>) -> Self {
        CouplingError::Usage {
            participant: participant.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T, E = CouplingError> = std::result::Result<T, E>;
