//! Contains the cursor driver that holds a server-side cursor id and walks it forward through
//! batched `getMore` fetches.

use std::{collections::VecDeque, time::Duration};

use bson::Document;

use crate::{
    change_stream::event::ResumeToken,
    client::{Client, SelectedServer},
    coll::Namespace,
    error::Result,
    operation::{get_more::GetMore, kill_cursors::KillCursors, CursorInfo},
    runtime,
};

/// Specification used to create a new cursor from a server reply.
#[derive(Debug)]
pub(crate) struct CursorSpecification {
    pub(crate) info: CursorInformation,
    pub(crate) initial_buffer: VecDeque<Document>,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
}

impl CursorSpecification {
    pub(crate) fn new(
        info: CursorInfo,
        server: SelectedServer,
        batch_size: Option<u32>,
        max_time: Option<Duration>,
        session_id: Option<Document>,
    ) -> Self {
        Self {
            info: CursorInformation {
                ns: info.ns,
                id: info.id,
                server,
                batch_size,
                max_time,
                session_id,
            },
            initial_buffer: info.first_batch,
            post_batch_resume_token: info.post_batch_resume_token.map(ResumeToken::new),
        }
    }
}

/// Static information about a cursor: where it lives and what every `getMore` must echo.
#[derive(Clone, Debug)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,
    pub(crate) server: SelectedServer,
    pub(crate) id: i64,
    pub(crate) batch_size: Option<u32>,
    pub(crate) max_time: Option<Duration>,
    pub(crate) session_id: Option<Document>,
}

/// The outcome of asking a cursor for the next buffered value.
#[derive(Debug)]
pub(crate) enum BatchValue {
    Some { doc: Document, is_last: bool },
    Empty,
    Exhausted,
}

/// A `Cursor` exclusively owns a server-side cursor id and surfaces its documents one at a time.
///
/// When a live cursor goes out of scope, a best-effort
/// [killCursors](https://www.mongodb.com/docs/manual/reference/command/killCursors/) is spawned
/// onto the ambient runtime; [`Cursor::close`] does the same round trip deterministically.
#[derive(Debug)]
pub struct Cursor {
    client: Client,
    info: CursorInformation,
    buffer: VecDeque<Document>,
    post_batch_resume_token: Option<ResumeToken>,
    exhausted: bool,
    /// The cursor is unreachable (transport loss) or its server is no longer trusted (state
    /// change); no further commands may be addressed to it.
    lost: bool,
    killed: bool,
}

impl Cursor {
    pub(crate) fn new(client: Client, spec: CursorSpecification) -> Self {
        let exhausted = spec.info.id == 0;
        Self {
            client,
            info: spec.info,
            buffer: spec.initial_buffer,
            post_batch_resume_token: spec.post_batch_resume_token,
            exhausted,
            lost: false,
            killed: false,
        }
    }

    /// The id of this cursor on the server. An id of zero means the server has closed it.
    pub fn id(&self) -> i64 {
        self.info.id
    }

    /// Whether the server has reported this cursor exhausted or invalid.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) fn post_batch_resume_token(&self) -> Option<&ResumeToken> {
        self.post_batch_resume_token.as_ref()
    }

    /// Retrieves the next buffered document, issuing a single `getMore` if the buffer is empty
    /// and the cursor is still live. A replenished-but-empty batch surfaces as
    /// [`BatchValue::Empty`] rather than looping.
    pub(crate) async fn next_in_batch(&mut self) -> Result<BatchValue> {
        if let Some(doc) = self.buffer.pop_front() {
            return Ok(BatchValue::Some {
                doc,
                is_last: self.buffer.is_empty(),
            });
        }
        if self.exhausted || self.lost {
            return Ok(BatchValue::Exhausted);
        }

        let mut op = GetMore::new(self.info.clone());
        let server = self.info.server.clone();
        match self.client.execute_operation(&mut op, Some(&server)).await {
            Ok(result) => {
                self.exhausted = result.exhausted;
                if result.exhausted {
                    self.info.id = 0;
                }
                if result.post_batch_resume_token.is_some() {
                    self.post_batch_resume_token = result.post_batch_resume_token;
                }
                self.buffer = result.batch;
                match self.buffer.pop_front() {
                    Some(doc) => Ok(BatchValue::Some {
                        doc,
                        is_last: self.buffer.is_empty(),
                    }),
                    None if self.exhausted => Ok(BatchValue::Exhausted),
                    None => Ok(BatchValue::Empty),
                }
            }
            Err(error) => {
                if !error.kill_cursor_required() {
                    self.lost = true;
                }
                if error.is_cursor_dead() {
                    self.exhausted = true;
                    self.info.id = 0;
                }
                Err(error)
            }
        }
    }

    /// Retrieves the next document from this cursor, fetching more batches until the server
    /// reports the cursor exhausted.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            match self.next_in_batch().await? {
                BatchValue::Some { doc, .. } => return Ok(Some(doc)),
                BatchValue::Empty => continue,
                BatchValue::Exhausted => return Ok(None),
            }
        }
    }

    fn owes_kill(&self) -> bool {
        self.info.id != 0 && !self.exhausted && !self.lost && !self.killed
    }

    /// Issues a best-effort `killCursors` for a live cursor. Idempotent; reply errors are
    /// reported but never re-raised by teardown paths.
    pub(crate) async fn kill(&mut self) -> Result<()> {
        if !self.owes_kill() {
            return Ok(());
        }
        self.killed = true;
        let mut op = KillCursors::new(&self.info);
        let server = self.info.server.clone();
        self.client
            .execute_operation(&mut op, Some(&server))
            .await
    }

    /// Kills the server-side cursor and consumes this handle. Errors from the `killCursors`
    /// round trip are swallowed.
    pub async fn close(mut self) {
        if let Err(error) = self.kill().await {
            tracing::debug!(cursor_id = self.info.id, %error, "killCursors on close failed");
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if !self.owes_kill() {
            return;
        }
        self.killed = true;
        let client = self.client.clone();
        let mut op = KillCursors::new(&self.info);
        let server = self.info.server.clone();
        runtime::execute(async move {
            let _ = client.execute_operation(&mut op, Some(&server)).await;
        });
    }
}
