pub(crate) mod aggregate;
pub(crate) mod get_more;
pub(crate) mod kill_cursors;

use std::{collections::VecDeque, fmt::Debug};

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::{
    client::SelectedServer,
    coll::Namespace,
    concern::WriteConcern,
    error::{Error, ErrorKind, Result},
    selection_criteria::SelectionCriteria,
};

/// A trait modeling the behavior of a server side operation.
pub(crate) trait Operation {
    /// The output type of this operation.
    type O;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    /// The operation may store some additional state that is required for handling the response.
    fn build(&mut self, server: &SelectedServer) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(&self, reply: Document, server: &SelectedServer) -> Result<Self::O>;

    /// Criteria to use for selecting the server that this operation will be executed on.
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }
}

/// A command built by an operation, addressed to a database.
#[derive(Clone, Debug)]
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) target_db: String,
    pub(crate) body: Document,
}

impl Command {
    pub(crate) fn new(name: impl Into<String>, target_db: impl Into<String>, body: Document) -> Self {
        Self {
            name: name.into(),
            target_db: target_db.into(),
            body,
        }
    }
}

/// Appends a serializable struct to the input document.
/// The serializable struct MUST serialize to a Document, otherwise an error will be returned.
pub(crate) fn append_options<T: Serialize + Debug>(
    doc: &mut Document,
    options: Option<&T>,
) -> Result<()> {
    match options {
        Some(options) => {
            let temp_doc = bson::to_bson(options)?;
            match temp_doc {
                Bson::Document(d) => {
                    doc.extend(d);
                    Ok(())
                }
                _ => Err(Error::internal(format!(
                    "options did not serialize to a Document: {:?}",
                    options
                ))),
            }
        }
        None => Ok(()),
    }
}

/// The body of a reply to a cursor-returning command.
#[derive(Debug, Deserialize)]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,
}

impl CursorBody {
    pub(crate) fn from_reply(reply: Document) -> Result<Self> {
        bson::from_document(reply).map_err(|e| {
            Error::new(
                ErrorKind::InvalidResponse {
                    message: format!("invalid server response to cursor command: {}", e),
                },
                None::<Option<String>>,
            )
        })
    }
}

/// The cursor document returned as part of a reply to a cursor-returning command.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,

    pub(crate) ns: Namespace,

    #[serde(default)]
    pub(crate) first_batch: VecDeque<Document>,

    pub(crate) post_batch_resume_token: Option<Document>,
}
