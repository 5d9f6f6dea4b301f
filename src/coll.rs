use std::{fmt, str::FromStr, time::Duration};

use bson::Document;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    change_stream::{options::ChangeStreamOptions, ChangeStream, WatchArgs},
    client::Client,
    concern::WriteConcern,
    cursor::Cursor,
    error::{Error, Result},
    operation::aggregate::Pipeline,
    selection_criteria::SelectionCriteria,
};

/// These are the valid options for creating a [`Collection`] with
/// [`Database::collection_with_options`](crate::Database::collection_with_options).
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct CollectionOptions {
    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,

    /// The default criteria used to select servers for read operations.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// These are the valid options for an aggregation operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AggregateOptions {
    /// The number of documents the server should return per cursor batch. Sent under the
    /// `cursor` sub-document of the aggregate, and echoed on every `getMore`.
    #[serde(skip_serializing)]
    pub batch_size: Option<u32>,

    /// The collation to use for the operation. A top-level aggregate option.
    pub collation: Option<Document>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a
    /// tailable await cursor query. Attached to every `getMore` as `maxTimeMS`.
    #[serde(skip_serializing)]
    pub max_await_time: Option<Duration>,

    /// The criteria used to select a server for this operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,

    /// The write concern to use for the operation, when the pipeline ends in a stage that
    /// writes its output.
    pub write_concern: Option<WriteConcern>,

    /// An opaque session document forwarded to the connection layer on every command emitted
    /// for this cursor.
    #[serde(skip_serializing)]
    pub session_id: Option<Document>,
}

impl AggregateOptions {
    /// Fills in the defaults inherited from the handle the aggregation runs against. The write
    /// concern default only applies to write-capable pipelines; callers pass `None` otherwise.
    pub(crate) fn resolve(
        options: Option<Self>,
        default_criteria: Option<&SelectionCriteria>,
        default_write_concern: Option<&WriteConcern>,
    ) -> Option<Self> {
        if default_criteria.is_none() && default_write_concern.is_none() {
            return options;
        }
        let mut opts = options.unwrap_or_default();
        if opts.selection_criteria.is_none() {
            opts.selection_criteria = default_criteria.cloned();
        }
        if opts.write_concern.is_none() {
            opts.write_concern = default_write_concern.cloned();
        }
        Some(opts)
    }
}

/// `Collection` is a handle to a collection in a MongoDB deployment. It is cheap to clone and
/// can be shared freely; all underlying state is carried by the [`Client`] it was created from.
#[derive(Clone, Debug)]
pub struct Collection {
    client: Client,
    ns: Namespace,
    write_concern: Option<WriteConcern>,
    selection_criteria: Option<SelectionCriteria>,
}

impl Collection {
    pub(crate) fn new(client: Client, ns: Namespace, options: Option<CollectionOptions>) -> Self {
        let options = options.unwrap_or_default();
        Self {
            client,
            ns,
            write_concern: options.write_concern,
            selection_criteria: options.selection_criteria,
        }
    }

    /// Gets the name of the `Collection`.
    pub fn name(&self) -> &str {
        &self.ns.coll
    }

    /// Gets the namespace of the `Collection`, i.e. the `db.coll` pair.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in this collection.
    /// A change stream cannot be started on system collections.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/changeStreams/) on
    /// change streams.
    ///
    /// Change streams require either a "majority" read concern or no read concern. Anything
    /// else will cause a server error.
    ///
    /// Note that using a `$project` stage to remove any of the `_id`, `operationType` or `ns`
    /// fields will cause an error. The driver requires these fields to support resumability.
    pub async fn watch(
        &self,
        pipeline: impl Into<Pipeline>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> Result<ChangeStream> {
        let options =
            ChangeStreamOptions::resolve(options.into(), self.selection_criteria.as_ref());
        let args = WatchArgs {
            pipeline: pipeline.into(),
            target: self.ns.clone().into(),
            options,
        };
        self.client.execute_watch(args, None).await
    }

    /// Runs an aggregation operation against this collection.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/aggregation/) for more
    /// information on aggregations.
    pub async fn aggregate(
        &self,
        pipeline: impl Into<Pipeline>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<Cursor> {
        let pipeline = pipeline.into();
        let options = AggregateOptions::resolve(
            options.into(),
            self.selection_criteria.as_ref(),
            self.write_concern
                .as_ref()
                .filter(|_| pipeline.has_write_stage()),
        );
        self.client
            .execute_aggregate(self.ns.clone().into(), pipeline, options)
            .await
    }
}

/// A struct modeling the canonical name for a collection in MongoDB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Construct a `Namespace` with the given database and collection.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');

        let db = parts.next();
        let coll = parts.collect::<Vec<_>>().join(".");

        match (db, coll) {
            (Some(db), coll) if !coll.is_empty() => Some(Self {
                db: db.to_string(),
                coll,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            Error::invalid_argument("missing one or more fields in namespace")
        })
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| D::Error::custom("missing one or more fields in namespace"))
    }
}

impl Serialize for Namespace {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("{}.{}", self.db, self.coll))
    }
}
