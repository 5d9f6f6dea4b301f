pub(crate) mod change_stream;


use std::sync::Once;

use bson::{doc, Bson, Document};

use crate::{
    bson_util,
    client::SelectedServer,
    coll::{AggregateOptions, Namespace},
    concern::WriteConcern,
    cursor::CursorSpecification,
    error::{Error, ErrorKind, Result},
    operation::{append_options, Command, CursorBody, Operation},
    selection_criteria::{ReadPreference, SelectionCriteria},
};

/// Earliest wire version that accepts a write concern on arbitrary commands.
const WIRE_VERSION_CMD_WRITE_CONCERN: i32 = 5;

static WRITE_STAGE_READ_PREF_WARNING: Once = Once::new();

/// An ordered list of aggregation pipeline stages.
///
/// Most callers build one from a stage vector or iterator; [`Pipeline::from_document`] accepts
/// the two document forms a raw command document may carry: a `{"pipeline": [...]}` wrapper, or
/// a numerically-keyed document standing in for an array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pipeline(Vec<Document>);

impl Pipeline {
    /// The stages of this pipeline, in order.
    pub fn stages(&self) -> &[Document] {
        &self.0
    }

    /// Interpret a free-form document as a pipeline. A document with a `pipeline` array field
    /// is unwrapped; any other document is read as a numerically-keyed pseudo-array in key
    /// order. Every stage must itself be a document.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let values: Vec<&Bson> = match doc.get("pipeline") {
            Some(Bson::Array(stages)) => stages.iter().collect(),
            _ => doc.values().collect(),
        };
        values
            .into_iter()
            .map(|value| match value {
                Bson::Document(stage) => Ok(stage.clone()),
                _ => Err(Error::invalid_argument(
                    "each aggregation pipeline stage must be a document",
                )),
            })
            .collect()
    }

    /// Whether the final stage of this pipeline writes its output to a collection.
    pub(crate) fn has_write_stage(&self) -> bool {
        self.0
            .last()
            .map(|stage| {
                let stage = bson_util::first_key(stage);
                stage == Some("$out") || stage == Some("$merge")
            })
            .unwrap_or(false)
    }
}

impl From<Vec<Document>> for Pipeline {
    fn from(stages: Vec<Document>) -> Self {
        Self(stages)
    }
}

impl<const N: usize> From<[Document; N]> for Pipeline {
    fn from(stages: [Document; N]) -> Self {
        Self(stages.into())
    }
}

impl FromIterator<Document> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug)]
pub(crate) struct Aggregate {
    target: AggregateTarget,
    pipeline: Pipeline,
    options: Option<AggregateOptions>,
    selection_criteria: Option<SelectionCriteria>,
}

impl Aggregate {
    pub(crate) fn new(
        target: AggregateTarget,
        pipeline: impl Into<Pipeline>,
        options: Option<AggregateOptions>,
    ) -> Self {
        let pipeline = pipeline.into();
        let mut selection_criteria = options
            .as_ref()
            .and_then(|opts| opts.selection_criteria.clone());
        if pipeline.has_write_stage() {
            let forced = match selection_criteria
                .as_ref()
                .and_then(SelectionCriteria::as_read_pref)
            {
                Some(ReadPreference::Primary) | None => false,
                Some(_) => true,
            };
            if forced {
                WRITE_STAGE_READ_PREF_WARNING.call_once(|| {
                    tracing::warn!(
                        "$out or $merge stage specified. Overriding read preference to primary."
                    );
                });
                selection_criteria = Some(SelectionCriteria::ReadPreference(ReadPreference::Primary));
            }
        }
        Self {
            target,
            pipeline,
            options,
            selection_criteria,
        }
    }
}

impl Operation for Aggregate {
    type O = CursorSpecification;
    const NAME: &'static str = "aggregate";

    fn build(&mut self, server: &SelectedServer) -> Result<Command> {
        if self.pipeline.has_write_stage()
            && self.write_concern().is_some()
            && server.max_wire_version < WIRE_VERSION_CMD_WRITE_CONCERN
        {
            return Err(ErrorKind::IncompatibleServer {
                message: format!(
                    "\"aggregate\" with \"$out\" or \"$merge\" does not support writeConcern \
                     with wire version {}, wire version {} is required",
                    server.max_wire_version, WIRE_VERSION_CMD_WRITE_CONCERN
                ),
            }
            .into());
        }

        let mut body = doc! {
            Self::NAME: self.target.to_bson(),
            "pipeline": bson_util::to_bson_array(self.pipeline.stages()),
            "cursor": {}
        };
        append_options(&mut body, self.options.as_ref())?;

        if let Some(batch_size) = self.options.as_ref().and_then(|opts| opts.batch_size) {
            // batchSize: 0 silently dropped when the pipeline ends in a write stage.
            if !(self.pipeline.has_write_stage() && batch_size == 0) {
                if let Ok(cursor_doc) = body.get_document_mut("cursor") {
                    cursor_doc.insert("batchSize", batch_size as i32);
                }
            }
        }

        if let Some(session_id) = self.options.as_ref().and_then(|opts| opts.session_id.as_ref()) {
            body.insert("lsid", session_id.clone());
        }

        Ok(Command::new(
            Self::NAME,
            self.target.db_name().to_string(),
            body,
        ))
    }

    fn handle_response(&self, reply: Document, server: &SelectedServer) -> Result<Self::O> {
        let body = CursorBody::from_reply(reply)?;
        Ok(CursorSpecification::new(
            body.cursor,
            server.clone(),
            self.options.as_ref().and_then(|opts| opts.batch_size),
            self.options.as_ref().and_then(|opts| opts.max_await_time),
            self.options.as_ref().and_then(|opts| opts.session_id.clone()),
        ))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.as_ref().and_then(|opts| opts.write_concern.as_ref())
    }
}

/// The target of an aggregation: a collection, or a whole database (`aggregate: 1`).
#[derive(Clone, Debug)]
pub(crate) enum AggregateTarget {
    Database(String),
    Collection(Namespace),
}

impl AggregateTarget {
    fn to_bson(&self) -> Bson {
        match self {
            AggregateTarget::Database(_) => Bson::Int32(1),
            AggregateTarget::Collection(ref ns) => Bson::String(ns.coll.to_string()),
        }
    }

    pub(crate) fn db_name(&self) -> &str {
        match self {
            AggregateTarget::Database(ref s) => s.as_str(),
            AggregateTarget::Collection(ref ns) => ns.db.as_str(),
        }
    }
}

impl From<Namespace> for AggregateTarget {
    fn from(ns: Namespace) -> Self {
        AggregateTarget::Collection(ns)
    }
}

impl From<String> for AggregateTarget {
    fn from(db_name: String) -> Self {
        AggregateTarget::Database(db_name)
    }
}
