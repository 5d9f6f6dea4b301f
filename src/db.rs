use typed_builder::TypedBuilder;

use crate::{
    change_stream::{options::ChangeStreamOptions, ChangeStream, WatchArgs},
    client::Client,
    coll::{AggregateOptions, Collection, CollectionOptions, Namespace},
    concern::WriteConcern,
    cursor::Cursor,
    error::Result,
    operation::aggregate::{AggregateTarget, Pipeline},
    selection_criteria::SelectionCriteria,
};

/// These are the valid options for creating a [`Database`] with
/// [`Client::database_with_options`].
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DatabaseOptions {
    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,

    /// The default criteria used to select servers for read operations.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// `Database` is a handle to a database in a MongoDB deployment. It is cheap to clone and can
/// be shared freely; all underlying state is carried by the [`Client`] it was created from.
#[derive(Clone, Debug)]
pub struct Database {
    client: Client,
    name: String,
    write_concern: Option<WriteConcern>,
    selection_criteria: Option<SelectionCriteria>,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str, options: Option<DatabaseOptions>) -> Self {
        let options = options.unwrap_or_default();
        Self {
            client,
            name: name.to_string(),
            write_concern: options.write_concern,
            selection_criteria: options.selection_criteria,
        }
    }

    /// Gets the name of the `Database`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets a handle to a collection specified by `name` of the database. The `Collection`
    /// inherits the write concern and selection criteria of this `Database`.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(
            self.client.clone(),
            Namespace::new(self.name.clone(), name),
            Some(
                CollectionOptions::builder()
                    .write_concern(self.write_concern.clone())
                    .selection_criteria(self.selection_criteria.clone())
                    .build(),
            ),
        )
    }

    /// Gets a handle to a collection with the given options.
    pub fn collection_with_options(&self, name: &str, options: CollectionOptions) -> Collection {
        Collection::new(
            self.client.clone(),
            Namespace::new(self.name.clone(), name),
            Some(options),
        )
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in this database. The
    /// stream does not observe changes from system collections and cannot be started on
    /// `config`, `local` or `admin` databases.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/changeStreams/) on
    /// change streams.
    pub async fn watch(
        &self,
        pipeline: impl Into<Pipeline>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> Result<ChangeStream> {
        let options =
            ChangeStreamOptions::resolve(options.into(), self.selection_criteria.as_ref());
        let args = WatchArgs {
            pipeline: pipeline.into(),
            target: AggregateTarget::Database(self.name.clone()),
            options,
        };
        self.client.execute_watch(args, None).await
    }

    /// Runs an aggregation operation against the whole database.
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
            self.write_concern.as_ref().filter(|_| pipeline.has_write_stage()),
        );
        self.client
            .execute_aggregate(
                AggregateTarget::Database(self.name.clone()),
                pipeline,
                options,
            )
            .await
    }
}
