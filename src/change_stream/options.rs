//! Contains options for change streams.

use std::time::Duration;

use bson::{Document, Timestamp};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    change_stream::event::ResumeToken,
    coll::AggregateOptions,
    selection_criteria::SelectionCriteria,
};

/// These are the valid options that can be passed to the `watch` method for creating a
/// [`ChangeStream`](crate::change_stream::ChangeStream). The serialized fields land in the
/// `$changeStream` stage; the skipped fields are routed elsewhere in the aggregate command or
/// onto every `getMore`.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamOptions {
    /// Configures how the `fullDocument` field of surfaced update events will be populated.
    /// The server default leaves it empty for updates.
    pub full_document: Option<FullDocumentType>,

    /// Specifies the logical starting point for the new change stream. Note that if a watched
    /// collection is dropped and recreated or newly renamed, `start_after` should be set
    /// instead. `resume_after` and `start_after` cannot be set simultaneously.
    ///
    /// For more information on resuming a change stream see the documentation
    /// [here](https://www.mongodb.com/docs/manual/changeStreams/#change-stream-resume-after).
    pub resume_after: Option<ResumeToken>,

    /// Takes a resume token and starts a new change stream returning the first notification
    /// after the token. This will allow users to watch collections that have been dropped and
    /// recreated or newly renamed collections without missing any notifications.
    ///
    /// This feature is only available on MongoDB 4.2+.
    ///
    /// See the documentation
    /// [here](https://www.mongodb.com/docs/master/changeStreams/#change-stream-start-after) for
    /// more information.
    pub start_after: Option<ResumeToken>,

    /// The change stream will only provide changes that occurred at or after the specified
    /// timestamp. Any command run against the server will return an operation time that can be
    /// used here.
    pub start_at_operation_time: Option<Timestamp>,

    /// If `true`, the change stream will monitor all changes for the given cluster.
    #[builder(setter(skip))]
    pub(crate) all_changes_for_cluster: Option<bool>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a change
    /// stream query. Attached to every `getMore` as `maxTimeMS`.
    #[serde(skip_serializing)]
    pub max_await_time: Option<Duration>,

    /// The number of documents to return per batch. Sent as `cursor.batchSize` on the initial
    /// aggregate and echoed on every `getMore`.
    #[serde(skip_serializing)]
    pub batch_size: Option<u32>,

    /// Specifies a collation. A top-level aggregate option, not a stage option.
    #[serde(skip_serializing)]
    pub collation: Option<Document>,

    /// The criteria used to select a server for this operation and for every reopen after a
    /// resumable failure.
    ///
    /// If none is specified, the selection criteria defined on the object executing this
    /// operation will be used.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,

    /// An opaque session document forwarded to the connection layer on every command emitted
    /// for this stream.
    #[serde(skip_serializing)]
    pub session_id: Option<Document>,
}

impl ChangeStreamOptions {
    /// Fills in the selection criteria inherited from the handle the stream is opened against.
    pub(crate) fn resolve(
        options: Option<Self>,
        default_criteria: Option<&SelectionCriteria>,
    ) -> Option<Self> {
        match (options, default_criteria) {
            (Some(mut opts), Some(criteria)) => {
                if opts.selection_criteria.is_none() {
                    opts.selection_criteria = Some(criteria.clone());
                }
                Some(opts)
            }
            (None, Some(criteria)) => Some(
                ChangeStreamOptions::builder()
                    .selection_criteria(criteria.clone())
                    .build(),
            ),
            (options, None) => options,
        }
    }

    pub(crate) fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions::builder()
            .batch_size(self.batch_size)
            .collation(self.collation.clone())
            .max_await_time(self.max_await_time)
            .selection_criteria(self.selection_criteria.clone())
            .session_id(self.session_id.clone())
            .build()
    }
}

/// Describes the modes for configuring the `fullDocument` field of surfaced events.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentType {
    /// The field will only be populated for insert and replace events.
    Default,

    /// The field will be populated with a copy of the entire document that was updated.
    UpdateLookup,

    /// User-defined other types for forward compatibility.
    #[serde(untagged)]
    Other(String),
}
