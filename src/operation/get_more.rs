use std::collections::VecDeque;

use bson::{doc, Document};
use serde::Deserialize;

use crate::{
    change_stream::event::ResumeToken,
    client::SelectedServer,
    cursor::CursorInformation,
    error::{Error, ErrorKind, Result},
    operation::{Command, Operation},
};

#[derive(Debug)]
pub(crate) struct GetMore {
    info: CursorInformation,
}

impl GetMore {
    pub(crate) fn new(info: CursorInformation) -> Self {
        Self { info }
    }
}

impl Operation for GetMore {
    type O = GetMoreResult;
    const NAME: &'static str = "getMore";

    fn build(&mut self, _server: &SelectedServer) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.info.id,
            "collection": self.info.ns.coll.clone(),
        };

        if let Some(batch_size) = self.info.batch_size {
            if batch_size != 0 {
                body.insert("batchSize", batch_size as i32);
            }
        }

        if let Some(ref max_time) = self.info.max_time {
            body.insert("maxTimeMS", max_time.as_millis() as i64);
        }

        if let Some(ref session_id) = self.info.session_id {
            body.insert("lsid", session_id.clone());
        }

        Ok(Command::new(Self::NAME, self.info.ns.db.clone(), body))
    }

    fn handle_response(&self, reply: Document, _server: &SelectedServer) -> Result<Self::O> {
        let body: GetMoreResponseBody = bson::from_document(reply).map_err(|e| {
            Error::new(
                ErrorKind::InvalidResponse {
                    message: format!("invalid server response to getMore: {}", e),
                },
                None::<Option<String>>,
            )
        })?;
        Ok(GetMoreResult {
            batch: body.cursor.next_batch,
            exhausted: body.cursor.id == 0,
            post_batch_resume_token: body.cursor.post_batch_resume_token.map(ResumeToken::new),
        })
    }
}

/// The result of a `getMore` round trip.
#[derive(Debug)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: VecDeque<Document>,
    pub(crate) exhausted: bool,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
}

#[derive(Debug, Deserialize)]
struct GetMoreResponseBody {
    cursor: NextBatchBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextBatchBody {
    #[serde(default)]
    id: i64,
    next_batch: VecDeque<Document>,
    post_batch_resume_token: Option<Document>,
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bson::doc;

    use super::*;
    use crate::{coll::Namespace, options::ServerAddress};

    fn server() -> SelectedServer {
        SelectedServer {
            address: ServerAddress::default(),
            max_wire_version: 7,
        }
    }

    fn info(batch_size: Option<u32>, max_time: Option<Duration>) -> CursorInformation {
        CursorInformation {
            ns: Namespace::new("db", "coll"),
            server: server(),
            id: 123,
            batch_size,
            max_time,
            session_id: None,
        }
    }

    #[test]
    fn build_minimal() {
        let mut op = GetMore::new(info(None, None));
        let cmd = op.build(&server()).unwrap();
        assert_eq!(cmd.target_db, "db");
        assert_eq!(cmd.body, doc! { "getMore": 123_i64, "collection": "coll" });
    }

    #[test]
    fn build_echoes_batch_size_and_max_time() {
        let mut op = GetMore::new(info(Some(5), Some(Duration::from_millis(5000))));
        let cmd = op.build(&server()).unwrap();
        assert_eq!(
            cmd.body,
            doc! {
                "getMore": 123_i64,
                "collection": "coll",
                "batchSize": 5,
                "maxTimeMS": 5000_i64,
            }
        );
    }

    #[test]
    fn zero_batch_size_is_not_echoed() {
        let mut op = GetMore::new(info(Some(0), None));
        let cmd = op.build(&server()).unwrap();
        assert!(!cmd.body.contains_key("batchSize"));
    }

    #[test]
    fn handle_response_reads_next_batch() {
        let op = GetMore::new(info(None, None));
        let result = op
            .handle_response(
                doc! {
                    "ok": 1,
                    "cursor": {
                        "id": 123_i64,
                        "ns": "db.coll",
                        "nextBatch": [{ "_id": { "x": 1 } }],
                        "postBatchResumeToken": { "resume": "pbr" },
                    },
                },
                &server(),
            )
            .unwrap();
        assert!(!result.exhausted);
        assert_eq!(result.batch.len(), 1);
        assert_eq!(
            result.post_batch_resume_token,
            Some(ResumeToken::new(doc! { "resume": "pbr" }))
        );
    }

    #[test]
    fn handle_response_detects_exhaustion() {
        let op = GetMore::new(info(None, None));
        let result = op
            .handle_response(
                doc! { "ok": 1, "cursor": { "id": 0_i64, "ns": "db.coll", "nextBatch": [] } },
                &server(),
            )
            .unwrap();
        assert!(result.exhausted);
        assert!(result.batch.is_empty());
    }
}
