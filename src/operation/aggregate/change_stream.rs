use bson::{doc, Bson, Document};

use crate::{
    change_stream::{event::ResumeToken, ChangeStreamData, WatchArgs},
    client::SelectedServer,
    concern::WriteConcern,
    cursor::CursorSpecification,
    error::Result,
    operation::{append_options, Command, Operation},
    selection_criteria::SelectionCriteria,
};

use super::Aggregate;

/// Earliest wire version on which `startAtOperationTime` may be sent.
const WIRE_VERSION_OPERATION_TIME: i32 = 7;

/// The `aggregate` that opens (or reopens) a change stream: injects the `$changeStream` stage in
/// front of the user pipeline and, on a resume, rewrites the stage options to the best tracked
/// resume position.
pub(crate) struct ChangeStreamAggregate {
    inner: Aggregate,
    args: WatchArgs,
    resume_data: Option<ChangeStreamData>,
}

impl ChangeStreamAggregate {
    pub(crate) fn new(args: &WatchArgs, resume_data: Option<ChangeStreamData>) -> Result<Self> {
        Ok(Self {
            inner: Self::build_inner(args)?,
            args: args.clone(),
            resume_data,
        })
    }

    fn build_inner(args: &WatchArgs) -> Result<Aggregate> {
        let mut stage_options = Document::new();
        append_options(&mut stage_options, args.options.as_ref())?;
        if !stage_options.contains_key("fullDocument") {
            stage_options.insert("fullDocument", "default");
        }

        let mut agg_pipeline = vec![doc! { "$changeStream": stage_options }];
        agg_pipeline.extend(args.pipeline.stages().iter().cloned());
        Ok(Aggregate::new(
            args.target.clone(),
            agg_pipeline,
            Some(
                args.options
                    .clone()
                    .unwrap_or_default()
                    .aggregate_options(),
            ),
        ))
    }
}

impl Operation for ChangeStreamAggregate {
    type O = (CursorSpecification, ChangeStreamData);
    const NAME: &'static str = Aggregate::NAME;

    fn build(&mut self, server: &SelectedServer) -> Result<Command> {
        if let Some(data) = &self.resume_data {
            let mut new_opts = self.args.options.clone().unwrap_or_default();
            if let Some(token) = data.resume_token.clone() {
                // A token the stream has tracked dominates every user anchor.
                new_opts.resume_after = Some(token);
                new_opts.start_after = None;
                new_opts.start_at_operation_time = None;
            } else if let Some(start_after) = new_opts.start_after.take() {
                // startAfter only applies to the original aggregate; a reopen continues the
                // stream, so it becomes resumeAfter with the same token.
                new_opts.resume_after = Some(start_after);
                new_opts.start_at_operation_time = None;
            } else if new_opts.resume_after.is_some() {
                new_opts.start_at_operation_time = None;
            } else if new_opts.start_at_operation_time.is_none() {
                if data.initial_operation_time.is_some()
                    && server.max_wire_version >= WIRE_VERSION_OPERATION_TIME
                {
                    new_opts.start_at_operation_time = data.initial_operation_time;
                }
            }

            self.inner = Self::build_inner(&WatchArgs {
                options: Some(new_opts),
                ..self.args.clone()
            })?;
        }
        self.inner.build(server)
    }

    fn handle_response(&self, reply: Document, server: &SelectedServer) -> Result<Self::O> {
        let op_time = match reply.get("operationTime") {
            Some(Bson::Timestamp(ts)) => Some(*ts),
            _ => None,
        };
        let spec = self.inner.handle_response(reply, server)?;

        let mut data = ChangeStreamData {
            resume_token: ResumeToken::initial(self.args.options.as_ref(), &spec),
            ..ChangeStreamData::default()
        };
        let has_no_anchor = self.args.options.as_ref().map_or(true, |opts| {
            opts.start_at_operation_time.is_none()
                && opts.resume_after.is_none()
                && opts.start_after.is_none()
        });
        if has_no_anchor
            && spec.post_batch_resume_token.is_none()
            && server.max_wire_version >= WIRE_VERSION_OPERATION_TIME
        {
            data.initial_operation_time = op_time;
        }

        Ok((spec, data))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.inner.selection_criteria()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.write_concern()
    }
}
