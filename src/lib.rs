#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub use ::bson;

mod bson_util;
pub mod change_stream;
mod client;
mod coll;
mod concern;
mod cursor;
mod db;
pub mod error;
mod operation;
pub mod options;
mod runtime;
mod selection_criteria;
mod serde_util;

pub use crate::{
    change_stream::{event::ResumeToken, ChangeStream},
    client::{Client, SelectedServer, Transport},
    coll::{Collection, Namespace},
    cursor::Cursor,
    db::Database,
    operation::aggregate::Pipeline,
};
