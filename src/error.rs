//! Contains the `Error` and `Result` types that `mongowatch` uses.

use std::{collections::HashSet, fmt, sync::Arc};

use bson::Document;
use serde::Deserialize;
use thiserror::Error;

const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const NOTWRITABLEPRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];

/// Server error codes that end a change stream even though the server is still healthy.
const NON_RESUMABLE_CODES: [i32; 3] = [11601, 136, 237];

/// Server error codes indicating the cursor no longer exists on the server.
const CURSOR_DEAD_CODES: [i32; 2] = [43, 237];

/// Error label the server attaches to change stream errors it considers recoverable.
pub const RESUMABLE_CHANGE_STREAM_ERROR: &str = "ResumableChangeStreamError";

/// The result type for all methods that can return an error in the `mongowatch` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongowatch` crate. The inner [`ErrorKind`] is boxed to keep
/// the happy path small; the whole value is cheap to clone so a change stream can store its
/// terminal error and hand out copies on every subsequent call.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
    labels: HashSet<String>,
    reply: Option<Document>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        Self {
            kind: Box::new(kind),
            labels: labels
                .map(|labels| labels.into_iter().collect())
                .unwrap_or_default(),
            reply: None,
        }
    }

    /// Builds an `Error` from a server reply with `ok: 0`, retaining the raw reply document.
    pub(crate) fn from_command_reply(reply: Document) -> Self {
        let (kind, labels) = match bson::from_document::<CommandErrorBody>(reply.clone()) {
            Ok(body) => (ErrorKind::Command(body.command_error), body.error_labels),
            Err(e) => (
                ErrorKind::InvalidResponse {
                    message: format!("invalid server error response: {}", e),
                },
                None,
            ),
        };
        let mut error = Self::new(kind, labels);
        error.reply = Some(reply);
        error
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    /// The raw server reply that produced this error, if the failure was a command error.
    pub fn server_reply(&self) -> Option<&Document> {
        self.reply.as_ref()
    }

    /// Returns the labels for this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        self.labels.contains(label.as_ref())
    }

    /// Gets the server error code from this error, if any. A code of zero means the server
    /// reply carried no code.
    pub(crate) fn code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(ref err) if err.code != 0 => Some(err.code),
            _ => None,
        }
    }

    pub(crate) fn is_network_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(..))
    }

    /// If this error corresponds to a "not writable primary" error as per the SDAM spec.
    fn is_notwritableprimary(&self) -> bool {
        self.code()
            .map(|code| NOTWRITABLEPRIMARY_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// If this error corresponds to a "node is recovering" error as per the SDAM spec.
    fn is_recovering(&self) -> bool {
        self.code()
            .map(|code| RECOVERING_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// Whether this error indicates the server changed state out from under the client. The
    /// legacy substring match applies only when the reply carried no error code.
    pub(crate) fn is_state_change_error(&self) -> bool {
        if self.is_notwritableprimary() || self.is_recovering() {
            return true;
        }
        match self.kind.as_ref() {
            ErrorKind::Command(ref err) if err.code == 0 => {
                err.message.contains("not master") || err.message.contains("node is recovering")
            }
            _ => false,
        }
    }

    /// If this error is resumable as per the change streams spec: any transport failure is,
    /// and a command error is unless it carries a non-resumable code. Labels win when the
    /// server supplies them.
    pub(crate) fn is_resumable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        match self.kind.as_ref() {
            ErrorKind::Command(ref err) => {
                if self.contains_label(RESUMABLE_CHANGE_STREAM_ERROR) {
                    return true;
                }
                if err.code != 0 {
                    return !NON_RESUMABLE_CODES.contains(&err.code);
                }
                err.message.contains("not master") || err.message.contains("node is recovering")
            }
            _ => false,
        }
    }

    /// Whether the cursor this error was produced for is still worth a `killCursors` round
    /// trip. Transport failures leave the cursor unreachable and state-change errors leave the
    /// server address untrusted, so neither owes a kill.
    pub(crate) fn kill_cursor_required(&self) -> bool {
        !(self.is_network_error() || self.is_state_change_error())
    }

    /// Whether the server reported the cursor itself as gone.
    pub(crate) fn is_cursor_dead(&self) -> bool {
        self.code()
            .map(|code| CURSOR_DEAD_CODES.contains(&code))
            .unwrap_or(false)
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<bson::de::Error> for ErrorKind {
    fn from(err: bson::de::Error) -> Self {
        Self::BsonDeserialization(err)
    }
}

impl From<bson::ser::Error> for ErrorKind {
    fn from(err: bson::ser::Error) -> Self {
        Self::BsonSerialization(err)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(bson::de::Error),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(bson::ser::Error),

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server returned an invalid reply to a database operation.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// The transport was not able to select a server for the operation.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// The server does not support the operation.
    #[error("The server does not support a database operation: {message}")]
    #[non_exhaustive]
    IncompatibleServer { message: String },

    /// No resume token was present in a change stream document.
    #[error("Cannot provide resume functionality when the resume token is missing")]
    MissingResumeToken,
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error. Zero when the server reply carried no code.
    #[serde(default)]
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// A response body useful for deserializing command errors.
#[derive(Deserialize, Debug)]
struct CommandErrorBody {
    #[serde(rename = "errorLabels")]
    error_labels: Option<Vec<String>>,

    #[serde(flatten)]
    command_error: CommandError,
}

#[cfg(test)]
mod test {
    use bson::doc;

    use super::*;

    fn command_error(reply: Document) -> Error {
        Error::from_command_reply(reply)
    }

    #[test]
    fn transport_errors_are_resumable_without_kill() {
        let error: Error = std::io::ErrorKind::ConnectionReset.into();
        assert!(error.is_resumable());
        assert!(!error.kill_cursor_required());
        assert!(error.server_reply().is_none());
    }

    #[test]
    fn coded_errors_are_resumable_unless_denylisted() {
        for code in [1, 6, 12345] {
            let error = command_error(doc! { "ok": 0, "code": code, "errmsg": "oops" });
            assert!(error.is_resumable(), "code {} should resume", code);
            assert!(error.kill_cursor_required());
        }
        for code in [11601, 136, 237] {
            let error = command_error(doc! { "ok": 0, "code": code, "errmsg": "not master" });
            assert!(!error.is_resumable(), "code {} should be fatal", code);
        }
    }

    #[test]
    fn state_change_errors_skip_the_kill() {
        let error = command_error(doc! { "ok": 0, "code": 10107, "errmsg": "not master" });
        assert!(error.is_resumable());
        assert!(!error.kill_cursor_required());

        let error = command_error(doc! { "ok": 0, "code": 11600, "errmsg": "shutting down" });
        assert!(error.is_resumable());
        assert!(!error.kill_cursor_required());
    }

    #[test]
    fn codeless_errors_match_legacy_strings() {
        let error = command_error(doc! { "ok": 0, "errmsg": "not master" });
        assert!(error.is_resumable());
        assert!(!error.kill_cursor_required());

        let error = command_error(doc! { "ok": 0, "errmsg": "node is recovering" });
        assert!(error.is_resumable());
        assert!(!error.kill_cursor_required());

        let error = command_error(doc! { "ok": 0, "errmsg": "random error" });
        assert!(!error.is_resumable());
    }

    #[test]
    fn labels_win_over_codes() {
        let error = command_error(doc! {
            "ok": 0,
            "code": 136,
            "errmsg": "capped position lost",
            "errorLabels": [RESUMABLE_CHANGE_STREAM_ERROR],
        });
        assert!(error.is_resumable());
    }

    #[test]
    fn dead_cursor_codes() {
        assert!(command_error(doc! { "ok": 0, "code": 43, "errmsg": "cursor not found" })
            .is_cursor_dead());
        assert!(command_error(doc! { "ok": 0, "code": 237, "errmsg": "cursor killed" })
            .is_cursor_dead());
        assert!(!command_error(doc! { "ok": 0, "code": 1, "errmsg": "internal" })
            .is_cursor_dead());
    }

    #[test]
    fn raw_reply_is_retained() {
        let reply = doc! { "ok": 0, "code": 123, "errmsg": "bad cmd" };
        let error = command_error(reply.clone());
        assert_eq!(error.server_reply(), Some(&reply));
        match *error.kind {
            ErrorKind::Command(ref err) => {
                assert_eq!(err.code, 123);
                assert_eq!(err.message, "bad cmd");
            }
            ref other => panic!("expected command error, got {:?}", other),
        }
    }
}
