use bson::{doc, Document};

use crate::{
    client::SelectedServer,
    coll::Namespace,
    cursor::CursorInformation,
    error::Result,
    operation::{Command, Operation},
};

#[derive(Debug)]
pub(crate) struct KillCursors {
    ns: Namespace,
    cursor_id: i64,
    session_id: Option<Document>,
}

impl KillCursors {
    pub(crate) fn new(info: &CursorInformation) -> Self {
        Self {
            ns: info.ns.clone(),
            cursor_id: info.id,
            session_id: info.session_id.clone(),
        }
    }
}

impl Operation for KillCursors {
    type O = ();
    const NAME: &'static str = "killCursors";

    fn build(&mut self, _server: &SelectedServer) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": [self.cursor_id],
        };
        if let Some(ref session_id) = self.session_id {
            body.insert("lsid", session_id.clone());
        }
        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, _reply: Document, _server: &SelectedServer) -> Result<Self::O> {
        Ok(())
    }
}
