//! Contains the resume token for change streams.

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::{change_stream::options::ChangeStreamOptions, cursor::CursorSpecification};

/// An opaque token used for resuming an interrupted
/// [`ChangeStream`](crate::change_stream::ChangeStream).
///
/// When starting a new change stream, the
/// [`start_after`](crate::options::ChangeStreamOptions::start_after) and
/// [`resume_after`](crate::options::ChangeStreamOptions::resume_after) fields on
/// [`ChangeStreamOptions`](crate::options::ChangeStreamOptions) can be specified with instances
/// of `ResumeToken`.
///
/// See the documentation
/// [here](https://www.mongodb.com/docs/manual/changeStreams/#change-stream-resume-token) for more
/// information on resume tokens.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ResumeToken(pub(crate) Document);

impl ResumeToken {
    pub(crate) fn new(doc: Document) -> Self {
        Self(doc)
    }

    /// The position a brand-new stream would resume from before any event has been surfaced:
    /// the post-batch resume token when the open reply carried one, otherwise whichever token
    /// anchor the user supplied.
    pub(crate) fn initial(
        options: Option<&ChangeStreamOptions>,
        spec: &CursorSpecification,
    ) -> Option<ResumeToken> {
        match &spec.post_batch_resume_token {
            Some(token) => Some(token.clone()),
            None => options.and_then(|opts| {
                opts.start_after
                    .clone()
                    .or_else(|| opts.resume_after.clone())
            }),
        }
    }
}

impl From<Document> for ResumeToken {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}
