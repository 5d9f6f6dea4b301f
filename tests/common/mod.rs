//! A scripted in-process stand-in for the connection layer: replies are queued up front, every
//! command and server selection is recorded for later assertions.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use bson::{doc, Document};
use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use mongowatch::{
    error::{ErrorKind, Result},
    options::{SelectionCriteria, ServerAddress},
    SelectedServer,
    Transport,
};

#[derive(Debug)]
enum Reply {
    Document(Document),
    NetworkError,
}

#[derive(Debug)]
struct MockInner {
    max_wire_version: i32,
    replies: Mutex<VecDeque<Reply>>,
    commands: Mutex<Vec<RecordedCommand>>,
    selections: Mutex<Vec<Option<SelectionCriteria>>>,
}

/// A command the core handed to the transport, as it would hit the wire.
#[derive(Clone, Debug)]
pub struct RecordedCommand {
    pub db: String,
    pub body: Document,
}

impl RecordedCommand {
    pub fn name(&self) -> &str {
        self.body.keys().next().map(String::as_str).unwrap_or("")
    }
}

#[derive(Clone, Debug)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new(max_wire_version: i32) -> Self {
        Self {
            inner: Arc::new(MockInner {
                max_wire_version,
                replies: Mutex::new(VecDeque::new()),
                commands: Mutex::new(Vec::new()),
                selections: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queue the reply for the next command. Replies are consumed in order; a command arriving
    /// with nothing queued gets a bare `{ok: 1}`.
    pub fn push_reply(&self, reply: Document) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(Reply::Document(reply));
    }

    /// Queue a transport-level failure (the mock-server hang-up) for the next command.
    pub fn push_network_error(&self) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(Reply::NetworkError);
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.inner.commands.lock().unwrap().clone()
    }

    /// The names of every command run so far, in order.
    pub fn command_names(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|cmd| cmd.name().to_string())
            .collect()
    }

    /// Every selection criteria passed to `select_server` so far, in order.
    pub fn selections(&self) -> Vec<Option<SelectionCriteria>> {
        self.inner.selections.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn select_server<'a>(
        &'a self,
        criteria: Option<&'a SelectionCriteria>,
    ) -> BoxFuture<'a, Result<SelectedServer>> {
        async move {
            self.inner
                .selections
                .lock()
                .unwrap()
                .push(criteria.cloned());
            Ok(SelectedServer {
                address: ServerAddress::default(),
                max_wire_version: self.inner.max_wire_version,
            })
        }
        .boxed()
    }

    fn run_command<'a>(
        &'a self,
        _server: &'a SelectedServer,
        db: &'a str,
        command: Document,
    ) -> BoxFuture<'a, Result<Document>> {
        async move {
            self.inner.commands.lock().unwrap().push(RecordedCommand {
                db: db.to_string(),
                body: command,
            });
            match self.inner.replies.lock().unwrap().pop_front() {
                Some(Reply::Document(reply)) => Ok(reply),
                Some(Reply::NetworkError) => {
                    Err(ErrorKind::from(std::io::ErrorKind::ConnectionReset).into())
                }
                None => Ok(doc! { "ok": 1 }),
            }
        }
        .boxed()
    }
}
