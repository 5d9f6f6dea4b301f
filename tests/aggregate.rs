mod common;

use bson::doc;
use common::MockTransport;
use mongowatch::{
    error::ErrorKind,
    options::{
        Acknowledgment,
        CollectionOptions,
        ReadPreference,
        SelectionCriteria,
        WriteConcern,
    },
    Client,
    Collection,
};
use pretty_assertions::assert_eq;

fn coll_with_defaults(mock: &MockTransport) -> Collection {
    Client::new(mock.clone())
        .database("db")
        .collection_with_options(
            "coll",
            CollectionOptions::builder()
                .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
                .selection_criteria(SelectionCriteria::ReadPreference(
                    ReadPreference::Secondary,
                ))
                .build(),
        )
}

#[tokio::test]
async fn write_stage_forces_primary_and_inherits_write_concern() {
    let mock = MockTransport::new(7);
    mock.push_reply(doc! {
        "cursor": { "id": 0_i64, "ns": "db.coll", "firstBatch": [] },
        "ok": 1,
    });

    let coll = coll_with_defaults(&mock);
    let mut cursor = coll
        .aggregate(
            vec![doc! { "$match": { "x": 1 } }, doc! { "$out": "other" }],
            None,
        )
        .await
        .unwrap();
    assert!(cursor.next().await.unwrap().is_none());

    assert_eq!(
        mock.selections(),
        vec![Some(SelectionCriteria::ReadPreference(
            ReadPreference::Primary
        ))]
    );
    assert_eq!(
        mock.commands()[0].body,
        doc! {
            "aggregate": "coll",
            "pipeline": [{ "$match": { "x": 1 } }, { "$out": "other" }],
            "cursor": {},
            "writeConcern": { "w": "majority" },
        }
    );
}

#[tokio::test]
async fn read_pipeline_keeps_the_handle_read_preference() {
    let mock = MockTransport::new(7);
    mock.push_reply(doc! {
        "cursor": { "id": 0_i64, "ns": "db.coll", "firstBatch": [] },
        "ok": 1,
    });

    let coll = coll_with_defaults(&mock);
    let mut cursor = coll
        .aggregate(vec![doc! { "$match": { "x": 1 } }], None)
        .await
        .unwrap();
    assert!(cursor.next().await.unwrap().is_none());

    assert_eq!(
        mock.selections(),
        vec![Some(SelectionCriteria::ReadPreference(
            ReadPreference::Secondary
        ))]
    );
    // No write stage, so the collection's write concern is not inherited.
    assert!(!mock.commands()[0].body.contains_key("writeConcern"));
}

#[tokio::test]
async fn write_concern_rejected_below_supporting_wire_version() {
    let mock = MockTransport::new(4);

    let coll = coll_with_defaults(&mock);
    let error = coll
        .aggregate(vec![doc! { "$out": "other" }], None)
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::IncompatibleServer { .. }));
    assert!(mock.commands().is_empty());
}

#[tokio::test]
async fn cursor_iterates_across_batches_and_exhausts() {
    let mock = MockTransport::new(7);
    mock.push_reply(doc! {
        "cursor": {
            "id": 123_i64,
            "ns": "db.coll",
            "firstBatch": [{ "x": 1 }, { "x": 2 }],
        },
        "ok": 1,
    });
    mock.push_reply(doc! {
        "cursor": { "id": 0_i64, "ns": "db.coll", "nextBatch": [{ "x": 3 }] },
        "ok": 1,
    });

    let coll = Client::new(mock.clone()).database("db").collection("coll");
    let mut cursor = coll.aggregate(vec![doc! { "$match": {} }], None).await.unwrap();

    let mut seen = Vec::new();
    while let Some(doc) = cursor.next().await.unwrap() {
        seen.push(doc);
    }
    assert_eq!(seen, vec![doc! { "x": 1 }, doc! { "x": 2 }, doc! { "x": 3 }]);
    assert!(cursor.is_exhausted());

    // The server reported the cursor exhausted; closing owes no killCursors.
    cursor.close().await;
    assert_eq!(mock.command_names(), vec!["aggregate", "getMore"]);
}
