//! Contains the functionality for change streams.
pub mod event;
pub(crate) mod options;

use bson::{Bson, Document, Timestamp};

use crate::{
    change_stream::{event::ResumeToken, options::ChangeStreamOptions},
    client::Client,
    cursor::{BatchValue, Cursor},
    error::{Error, ErrorKind, Result},
    operation::aggregate::{AggregateTarget, Pipeline},
};

/// A `ChangeStream` streams the ongoing changes of its associated collection, database or
/// deployment. `ChangeStream` instances should be created with method `watch` against the
/// relevant target.
///
/// `ChangeStream`s are "resumable", meaning that they can be restarted at a given place in the
/// stream of events. This is done automatically when the `ChangeStream` encounters certain
/// ["resumable"](https://github.com/mongodb/specifications/blob/master/source/change-streams/change-streams.md#resumable-error)
/// errors, such as transient network failures. It can also be done manually by passing a
/// [`ResumeToken`] retrieved from a past event into either the
/// [`resume_after`](crate::options::ChangeStreamOptions::resume_after) or
/// [`start_after`](crate::options::ChangeStreamOptions::start_after) (4.2+) options used to
/// create the `ChangeStream`.
///
/// Events are surfaced as raw documents in the order the server produced them; a failed resume
/// attempt ends the stream, and the terminal error stays readable through
/// [`error_document`](ChangeStream::error_document).
///
/// A `ChangeStream` is single-owner: iterate it from the thread (or task) that holds it. If one
/// is still open when it goes out of scope, it is closed via an asynchronous
/// [killCursors](https://www.mongodb.com/docs/manual/reference/command/killCursors/) command
/// executed from its [`Drop`](https://doc.rust-lang.org/std/ops/trait.Drop.html) implementation;
/// [`close`](ChangeStream::close) does the same deterministically.
#[derive(Debug)]
pub struct ChangeStream {
    /// The client this stream issues its commands through.
    client: Client,

    /// The cursor to iterate over event documents.
    cursor: Cursor,

    /// Arguments to `watch` that created this change stream.
    args: WatchArgs,

    /// Dynamic information associated with this change stream.
    data: ChangeStreamData,

    /// The first error this stream surfaced. Once set, no further I/O happens.
    terminal_error: Option<Error>,
}

impl ChangeStream {
    pub(crate) fn new(
        client: Client,
        cursor: Cursor,
        args: WatchArgs,
        data: ChangeStreamData,
    ) -> Self {
        Self {
            client,
            cursor,
            args,
            data,
            terminal_error: None,
        }
    }

    /// Returns the cached resume token that can be used to resume after the most recently
    /// returned change.
    ///
    /// See the documentation
    /// [here](https://www.mongodb.com/docs/manual/changeStreams/#change-stream-resume-token) for
    /// more information on change stream resume tokens.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.data.resume_token.clone()
    }

    /// Returns whether the change stream will continue to receive events.
    pub fn is_alive(&self) -> bool {
        self.terminal_error.is_none() && !self.cursor.is_exhausted()
    }

    /// The error that ended this stream, if any, along with the raw server reply when the
    /// failure was a command error.
    pub fn error_document(&self) -> Option<(&Error, Option<&Document>)> {
        self.terminal_error
            .as_ref()
            .map(|error| (error, error.server_reply()))
    }

    /// Retrieves the next event from the change stream, blocking until one arrives, the stream
    /// is invalidated, or an unrecoverable error occurs.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            match self.next_if_any().await? {
                Some(event) => return Ok(Some(event)),
                None if self.is_alive() => continue,
                None => return Ok(None),
            }
        }
    }

    /// Retrieves the next event from the change stream, if any.
    ///
    /// Where calling [`next`](ChangeStream::next) will internally loop until an event is
    /// received, this will make at most one request and return `None` if the returned batch is
    /// empty. This method should be used when storing the resume token in order to ensure the
    /// most up to date token is received.
    pub async fn next_if_any(&mut self) -> Result<Option<Document>> {
        if let Some(error) = &self.terminal_error {
            return Err(error.clone());
        }
        loop {
            match self.advance().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_resumable() && !self.data.resume_attempted => {
                    self.data.resume_attempted = true;
                    match self.resume(&error).await {
                        Ok(()) => {
                            // After a successful resume, another resume must be allowed.
                            self.data.resume_attempted = false;
                        }
                        Err(resume_error) => {
                            self.terminal_error = Some(resume_error.clone());
                            return Err(resume_error);
                        }
                    }
                }
                Err(error) => {
                    self.terminal_error = Some(error.clone());
                    return Err(error);
                }
            }
        }
    }

    /// Kills the server-side cursor if it is still live and consumes the stream. Errors from
    /// the `killCursors` round trip are swallowed.
    pub async fn close(self) {
        self.cursor.close().await;
    }

    async fn advance(&mut self) -> Result<Option<Document>> {
        let batch_value = self.cursor.next_in_batch().await?;
        if let Some(token) =
            get_resume_token(&batch_value, self.cursor.post_batch_resume_token())?
        {
            self.data.resume_token = Some(token);
        }
        match batch_value {
            BatchValue::Some { doc, .. } => Ok(Some(doc)),
            BatchValue::Empty | BatchValue::Exhausted => Ok(None),
        }
    }

    /// Reopens the stream after a resumable failure: best-effort kill of the old cursor when
    /// its server is still trusted, then a fresh `aggregate` built from the original arguments
    /// and the tracked resume position.
    async fn resume(&mut self, error: &Error) -> Result<()> {
        if error.kill_cursor_required() {
            if let Err(kill_error) = self.cursor.kill().await {
                tracing::debug!(%kill_error, "ignoring killCursors failure during resume");
            }
        }
        tracing::debug!(db = %self.args.target.db_name(), "resuming change stream");
        let new_stream = self
            .client
            .execute_watch(self.args.clone(), Some(self.data.clone()))
            .await?;
        self.cursor = new_stream.cursor;
        self.args = new_stream.args;
        Ok(())
    }
}

/// Arguments passed to a `watch` method, captured to allow resume.
#[derive(Debug, Clone)]
pub(crate) struct WatchArgs {
    /// The pipeline of stages to append to an initial `$changeStream` stage.
    pub(crate) pipeline: Pipeline,

    /// The original target of the change stream.
    pub(crate) target: AggregateTarget,

    /// The options provided to the initial `$changeStream` stage.
    pub(crate) options: Option<ChangeStreamOptions>,
}

/// Dynamic change stream data needed for resume.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChangeStreamData {
    /// The `operationTime` returned by the initial `aggregate` command, if nothing better was
    /// available to resume from.
    pub(crate) initial_operation_time: Option<Timestamp>,

    /// The cached resume token.
    pub(crate) resume_token: Option<ResumeToken>,

    /// Whether the current fetch has already attempted a resume; each failing `getMore` gets
    /// at most one.
    pub(crate) resume_attempted: bool,
}

fn get_resume_token(
    batch_value: &BatchValue,
    batch_token: Option<&ResumeToken>,
) -> Result<Option<ResumeToken>> {
    Ok(match batch_value {
        BatchValue::Some { doc, is_last } => {
            let doc_token = match doc.get("_id") {
                Some(Bson::Document(id)) => ResumeToken::new(id.clone()),
                _ => return Err(ErrorKind::MissingResumeToken.into()),
            };
            if *is_last && batch_token.is_some() {
                batch_token.cloned()
            } else {
                Some(doc_token)
            }
        }
        BatchValue::Empty => batch_token.cloned(),
        BatchValue::Exhausted => None,
    })
}

#[cfg(test)]
mod test {
    use bson::doc;

    use super::*;

    #[test]
    fn event_token_wins_mid_batch() {
        let value = BatchValue::Some {
            doc: doc! { "_id": { "t": 1 } },
            is_last: false,
        };
        let batch_token = ResumeToken::new(doc! { "pbr": 1 });
        let token = get_resume_token(&value, Some(&batch_token)).unwrap();
        assert_eq!(token, Some(ResumeToken::new(doc! { "t": 1 })));
    }

    #[test]
    fn post_batch_token_wins_at_batch_end() {
        let value = BatchValue::Some {
            doc: doc! { "_id": { "t": 1 } },
            is_last: true,
        };
        let batch_token = ResumeToken::new(doc! { "pbr": 1 });
        let token = get_resume_token(&value, Some(&batch_token)).unwrap();
        assert_eq!(token, Some(batch_token));
    }

    #[test]
    fn empty_batch_carries_post_batch_token() {
        let batch_token = ResumeToken::new(doc! { "pbr": 1 });
        let token = get_resume_token(&BatchValue::Empty, Some(&batch_token)).unwrap();
        assert_eq!(token, Some(batch_token));
        assert_eq!(get_resume_token(&BatchValue::Empty, None).unwrap(), None);
    }

    #[test]
    fn missing_or_scalar_id_is_rejected() {
        for doc in [doc! { "x": 1 }, doc! { "_id": 5 }] {
            let value = BatchValue::Some {
                doc,
                is_last: false,
            };
            let error = get_resume_token(&value, None).unwrap_err();
            assert!(matches!(*error.kind, ErrorKind::MissingResumeToken));
        }
    }
}
