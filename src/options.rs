//! Contains the types for the options that can be passed to the operations and handles in this
//! crate, plus the address type servers are identified by.

use std::fmt;

pub use crate::{
    change_stream::options::{ChangeStreamOptions, FullDocumentType},
    coll::{AggregateOptions, CollectionOptions},
    concern::{Acknowledgment, WriteConcern},
    db::DatabaseOptions,
    selection_criteria::{ReadPreference, SelectionCriteria},
};

/// An enum representing the address of a MongoDB server.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port combination.
    Tcp {
        /// The hostname or IP address where the MongoDB server can be found.
        host: String,

        /// The TCP port that the MongoDB server is listening on.
        ///
        /// The default is 27017.
        port: Option<u16>,
    },
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => {
                write!(fmt, "{}:{}", host, port.unwrap_or(27017))
            }
        }
    }
}
