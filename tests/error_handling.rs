//! Error handling and edge case tests.

mod common;

use common::{blog_schema, blog_store, init_tracing, Server};
use record_graph::{
    AdapterError, FindOptions, Properties, PropertyValue, RecordState, Store, StoreConfig,
    StoreError, TicketState,
};
use serde_json::json;

// --- Lookup Errors ---

#[test]
fn test_unknown_model_type() {
    let mut store = blog_store(Server::new());
    assert!(matches!(
        store.find_record("nope", "1"),
        Err(StoreError::UnknownModelType(_))
    ));
    assert!(matches!(
        store.push("nope", json!({"id": "1"})),
        Err(StoreError::UnknownModelType(_))
    ));
}

#[test]
fn test_unknown_attribute_and_relationship() {
    let mut store = blog_store(Server::new());
    let post = store.push("post", json!({"id": "1"})).unwrap();
    assert!(matches!(
        store.set_attr(post, "nope", json!(1)),
        Err(StoreError::UnknownAttribute { .. })
    ));
    assert!(matches!(
        store.get_has_many(post, "nope"),
        Err(StoreError::UnknownRelationship { .. })
    ));
    assert!(matches!(
        store.create_record("post", Properties::new().value("nope", json!(1))),
        Err(StoreError::UnknownAttribute { .. })
    ));
}

#[test]
fn test_wrong_property_kind() {
    let mut store = blog_store(Server::new());
    let result = store.create_record("comment", Properties::new().records("post", vec![]));
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));

    let result = store.create_record(
        "post",
        Properties::new().value("title", json!("x")).records("title", vec![]),
    );
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
}

// --- Fetch Errors ---

#[test]
fn test_missing_record_rejects_and_unloads() {
    let server = Server::new();
    let mut store = blog_store(server);
    let ticket = store.find_record("post", "404").unwrap();
    let err = store.wait(ticket).unwrap_err();
    assert!(matches!(err, StoreError::Adapter(AdapterError::Transport(_))));
    assert!(store.peek_record("post", "404").is_none());

    // A later find starts over.
    let ticket = store.find_record("post", "404").unwrap();
    assert!(store.wait(ticket).is_err());
}

#[test]
fn test_no_adapter_rejects_fetch() {
    init_tracing();
    let mut store = Store::new(StoreConfig::default(), blog_schema());
    let ticket = store.find_record("post", "1").unwrap();
    assert!(matches!(store.wait(ticket), Err(StoreError::NoAdapter(_))));
}

#[test]
fn test_preload_then_failed_fetch() {
    let server = Server::new();
    let mut store = blog_store(server);
    let ticket = store
        .find_record_with(
            "post",
            "1",
            FindOptions::preload(Properties::new().value("title", json!("cached"))),
        )
        .unwrap();
    let post = store.record_for_id("post", "1").unwrap();
    assert_eq!(store.attr(post, "title").unwrap(), Some(json!("cached")));
    assert!(store.wait(ticket).is_err());
}

// --- Save Errors ---

#[test]
fn test_invalid_create_can_be_fixed_and_resaved() {
    let server = Server::new();
    let mut store = blog_store(server.clone());
    let post = store
        .create_record("post", Properties::new().value("title", json!("")))
        .unwrap();
    server.reply(Err(AdapterError::Invalid(
        json!({"errors": [{"source": {"pointer": "/data/attributes/title"}, "detail": "is blank"}]}),
    )));

    let ticket = store.save_record(post).unwrap();
    let err = store.wait(ticket).unwrap_err();
    assert!(err.is_invalid());
    assert_eq!(store.state(post).unwrap(), RecordState::CreatedInvalid);
    assert_eq!(
        store.errors(post).unwrap().errors_for("title"),
        &["is blank".to_string()]
    );

    store.set_attr(post, "title", json!("Fixed")).unwrap();
    assert_eq!(store.state(post).unwrap(), RecordState::CreatedUncommitted);
    let ticket = store.save_record(post).unwrap();
    store.wait(ticket).unwrap();
    assert_eq!(store.state(post).unwrap(), RecordState::LoadedSaved);
    assert_eq!(server.count("create"), 2);
}

#[test]
fn test_failed_delete_can_be_retried() {
    let server = Server::new();
    let mut store = blog_store(server.clone());
    let post = store.push("post", json!({"id": "1"})).unwrap();
    server.reply(Err(AdapterError::Transport("timeout".into())));

    let ticket = store.destroy_record(post).unwrap();
    assert!(store.wait(ticket).is_err());
    assert!(store.is_error(post).unwrap());
    assert!(store.flags(post).unwrap().is_deleted);

    let ticket = store.save_record(post).unwrap();
    store.wait(ticket).unwrap();
    assert!(store.is_destroyed(post).unwrap());
}

// --- Unhandled Events ---

#[test]
fn test_edits_rejected_while_deleted() {
    let mut store = blog_store(Server::new());
    let post = store.push("post", json!({"id": "1"})).unwrap();
    store.delete_record(post).unwrap();
    assert!(matches!(
        store.set_attr(post, "title", json!("x")),
        Err(StoreError::UnhandledEvent { .. })
    ));
    assert_eq!(store.state(post).unwrap(), RecordState::DeletedUncommitted);

    // Rolling back the deletion makes the record editable again.
    store.rollback(post).unwrap();
    store.set_attr(post, "title", json!("x")).unwrap();
}

#[test]
fn test_destroyed_record_refuses_work() {
    let mut store = blog_store(Server::new());
    let post = store.create_record("post", Properties::new()).unwrap();
    let ticket = store.destroy_record(post).unwrap();
    store.wait(ticket).unwrap();
    assert!(matches!(
        store.set_attr(post, "title", json!("x")),
        Err(StoreError::RecordDestroyed(_))
    ));
    assert!(matches!(
        store.get_has_many(post, "comments"),
        Err(StoreError::RecordDestroyed(_))
    ));
}

// --- Relationship Errors ---

#[test]
fn test_sync_relationship_with_unloaded_target() {
    let mut store = blog_store(Server::new());
    let post = store.push("post", json!({"id": "1", "author": "9"})).unwrap();
    assert!(matches!(
        store.get_belongs_to(post, "author"),
        Err(StoreError::RelationshipNotLoaded { .. })
    ));
}

#[test]
fn test_type_mismatch_in_relationship() {
    let mut store = blog_store(Server::new());
    let post = store.push("post", json!({"id": "1"})).unwrap();
    let tag = store.push("tag", json!({"id": "t"})).unwrap();
    assert!(matches!(
        store.has_many_add(post, "comments", &[tag]),
        Err(StoreError::InvalidOperation(_))
    ));
    assert!(matches!(
        store.create_record("post", Properties::new().record("author", Some(tag))),
        Err(StoreError::InvalidOperation(_))
    ));
}

// --- Identity ---

#[test]
fn test_duplicate_client_id() {
    let mut store = blog_store(Server::new());
    store.push("post", json!({"id": "1"})).unwrap();
    let result = store.create_record("post", Properties::new().value("id", json!("1")));
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
    assert!(matches!(
        Properties::from(json!({"id": "1"})).get("id"),
        Some(PropertyValue::Value(_))
    ));
}

// --- Run Loop ---

#[test]
fn test_flush_limit() {
    init_tracing();
    let mut store = Store::new(
        StoreConfig {
            max_flush_tasks: 1,
            ..Default::default()
        },
        blog_schema(),
    );
    store
        .push_many("post", vec![json!({"id": "1"}), json!({"id": "2"})])
        .unwrap();
    assert!(matches!(store.flush(), Err(StoreError::FlushLimit(1))));
}

#[test]
fn test_ticket_errors() {
    let mut store = blog_store(Server::new());
    let post = store.push("post", json!({"id": "1"})).unwrap();
    let ticket = store.reload_record(post).unwrap();
    assert!(matches!(store.ticket(ticket).unwrap(), TicketState::Pending));
    assert!(matches!(
        store.ticket_result(ticket),
        Err(StoreError::TicketPending(_))
    ));
}
