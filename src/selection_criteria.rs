//! Contains the types for read preferences.

use serde::{Deserialize, Serialize};

/// Describes which servers are suitable for a given operation.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SelectionCriteria {
    /// A read preference that describes the suitable servers based on the server type.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/core/read-preference/) for
    /// more details.
    ReadPreference(ReadPreference),
}

impl SelectionCriteria {
    pub(crate) fn as_read_pref(&self) -> Option<&ReadPreference> {
        match self {
            Self::ReadPreference(ref read_pref) => Some(read_pref),
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_pref: ReadPreference) -> Self {
        Self::ReadPreference(read_pref)
    }
}

/// Specifies how the driver routes a read operation to members of a replica set. Tag sets and
/// staleness bounds are resolved by the transport layer; only the mode is modeled here.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/core/read-preference) for more
/// details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum ReadPreference {
    /// Only route this operation to the primary.
    Primary,

    /// Only route this operation to a secondary.
    Secondary,

    /// Route this operation to the primary if it's available, but fall back to the secondaries
    /// if not.
    PrimaryPreferred,

    /// Route this operation to a secondary if one is available, but fall back to the primary if
    /// not.
    SecondaryPreferred,

    /// Route this operation to the node with the least network latency regardless of whether
    /// it's the primary or a secondary.
    Nearest,
}
