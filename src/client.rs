use std::{fmt, sync::Arc};

use bson::Document;
use futures_core::future::BoxFuture;

use crate::{
    bson_util,
    change_stream::{
        options::ChangeStreamOptions,
        ChangeStream,
        ChangeStreamData,
        WatchArgs,
    },
    coll::AggregateOptions,
    cursor::Cursor,
    db::Database,
    error::{Error, ErrorKind, Result},
    operation::{
        aggregate::{change_stream::ChangeStreamAggregate, Aggregate, AggregateTarget, Pipeline},
        Operation,
    },
    options::ServerAddress,
    selection_criteria::SelectionCriteria,
};

/// The contract between the change stream core and the connection layer. Implementations own
/// topology discovery, monitoring, pooling, authentication and wire framing; this crate only
/// ever asks them to pick a server and to run one command document against it.
pub trait Transport: Send + Sync {
    /// Select a server suitable for the given criteria, performing whatever discovery and
    /// latency window logic the topology requires.
    fn select_server<'a>(
        &'a self,
        criteria: Option<&'a SelectionCriteria>,
    ) -> BoxFuture<'a, Result<SelectedServer>>;

    /// Run a single command against the given server's database, returning the server's raw
    /// reply document. A reply with `ok: 0` is still an `Ok` value here; `Err` is reserved for
    /// transport-level failures (connection loss, timeouts) where no reply exists.
    fn run_command<'a>(
        &'a self,
        server: &'a SelectedServer,
        db: &'a str,
        command: Document,
    ) -> BoxFuture<'a, Result<Document>>;
}

/// A server chosen by [`Transport::select_server`]: its address plus the wire version
/// negotiated at handshake, which gates feature availability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedServer {
    /// The address of the server.
    pub address: ServerAddress,

    /// The highest wire protocol version the server supports.
    pub max_wire_version: i32,
}

/// The entry point to watching a MongoDB deployment. A `Client` is a cheaply cloneable handle
/// over a [`Transport`]; the transport must be safe to share, and every stream opened through
/// one client goes through the same underlying topology.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new `Client` over the given connection layer.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Gets a handle to a database specified by `name` in the deployment the `Client` is
    /// connected to.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name, None)
    }

    /// Gets a handle to a database with the given options.
    pub fn database_with_options(
        &self,
        name: &str,
        options: crate::db::DatabaseOptions,
    ) -> Database {
        Database::new(self.clone(), name, Some(options))
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in the deployment.
    /// The stream does not observe changes from system collections or the `config`, `local` or
    /// `admin` databases. Note that this method (`watch` on a whole deployment) is only
    /// supported in MongoDB 4.0 or greater.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/changeStreams/) on
    /// change streams.
    pub async fn watch(
        &self,
        pipeline: impl Into<Pipeline>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> Result<ChangeStream> {
        let mut options = options.into().unwrap_or_default();
        options.all_changes_for_cluster = Some(true);
        let args = WatchArgs {
            pipeline: pipeline.into(),
            target: AggregateTarget::Database("admin".to_string()),
            options: Some(options),
        };
        self.execute_watch(args, None).await
    }

    pub(crate) async fn select_server(
        &self,
        criteria: Option<&SelectionCriteria>,
    ) -> Result<SelectedServer> {
        self.transport.select_server(criteria).await
    }

    /// Selects a server (unless the operation is pinned to one), builds the operation's
    /// command, runs it, and interprets the reply. A reply with `ok: 0` becomes a command
    /// error carrying the raw reply document.
    pub(crate) async fn execute_operation<Op: Operation>(
        &self,
        op: &mut Op,
        pinned_server: Option<&SelectedServer>,
    ) -> Result<Op::O> {
        let server = match pinned_server {
            Some(server) => server.clone(),
            None => self.select_server(op.selection_criteria()).await?,
        };
        let command = op.build(&server)?;
        let reply = self
            .transport
            .run_command(&server, &command.target_db, command.body)
            .await?;
        let ok = reply
            .get("ok")
            .and_then(bson_util::get_int)
            .ok_or_else(|| {
                Error::from(ErrorKind::InvalidResponse {
                    message: format!("missing 'ok' field in {} response", command.name),
                })
            })?;
        if ok != 1 {
            return Err(Error::from_command_reply(reply));
        }
        op.handle_response(reply, &server)
    }

    /// Opens (or, given resume data, reopens) a change stream.
    pub(crate) async fn execute_watch(
        &self,
        args: WatchArgs,
        resume_data: Option<ChangeStreamData>,
    ) -> Result<ChangeStream> {
        let mut op = ChangeStreamAggregate::new(&args, resume_data)?;
        let (spec, data) = self.execute_operation(&mut op, None).await?;
        let cursor = Cursor::new(self.clone(), spec);
        Ok(ChangeStream::new(self.clone(), cursor, args, data))
    }

    /// Runs a plain (non-change-stream) aggregation and hands back its cursor.
    pub(crate) async fn execute_aggregate(
        &self,
        target: AggregateTarget,
        pipeline: Pipeline,
        options: Option<AggregateOptions>,
    ) -> Result<Cursor> {
        let mut op = Aggregate::new(target, pipeline, options);
        let spec = self.execute_operation(&mut op, None).await?;
        Ok(Cursor::new(self.clone(), spec))
    }
}

#[cfg(test)]
mod test {
    use bson::doc;
    use futures_util::FutureExt;

    use super::*;

    struct NoServers;

    impl Transport for NoServers {
        fn select_server<'a>(
            &'a self,
            _criteria: Option<&'a SelectionCriteria>,
        ) -> BoxFuture<'a, Result<SelectedServer>> {
            async {
                Err(Error::from(ErrorKind::ServerSelection {
                    message: "no suitable server".to_string(),
                }))
            }
            .boxed()
        }

        fn run_command<'a>(
            &'a self,
            _server: &'a SelectedServer,
            _db: &'a str,
            _command: Document,
        ) -> BoxFuture<'a, Result<Document>> {
            async { Ok(doc! { "ok": 1 }) }.boxed()
        }
    }

    #[tokio::test]
    async fn selection_failure_surfaces_on_open() {
        let client = Client::new(NoServers);
        let error = client
            .database("db")
            .collection("coll")
            .watch(Vec::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(*error.kind, ErrorKind::ServerSelection { .. }));
    }
}
