//! Record array maintenance as records come and go.

mod common;

use common::{blog_store, Server};
use record_graph::{
    RecordView, StoreEvent, SubscriptionConfig, SubscriptionFilter, TicketValue,
};
use serde_json::json;

fn published(view: &RecordView<'_>) -> bool {
    view.attr("published") == Some(&json!(true))
}

// --- Live Arrays ---

#[test]
fn test_live_array_change_events() {
    let mut store = blog_store(Server::new());
    let all = store.peek_all("post").unwrap();
    let sub = store.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::record_arrays(),
        ..Default::default()
    });

    store
        .push_many("post", vec![json!({"id": "1"}), json!({"id": "2"})])
        .unwrap();
    store.flush().unwrap();

    let events = sub.drain();
    assert_eq!(
        events.last(),
        Some(&StoreEvent::RecordArrayChanged {
            array: all,
            model: "post".to_string(),
            len: 2,
        })
    );
    assert!(events
        .iter()
        .all(|e| matches!(e, StoreEvent::RecordArrayChanged { array, .. } if *array == all)));

    // Updating an attribute keeps membership, so nothing is announced.
    let post = store.peek_record("post", "1").unwrap();
    store.set_attr(post, "title", json!("x")).unwrap();
    store.flush().unwrap();
    assert!(sub.drain().is_empty());
}

#[test]
fn test_deleted_record_leaves_arrays_at_once() {
    let mut store = blog_store(Server::new());
    let post = store.push("post", json!({"id": "1", "published": true})).unwrap();
    let all = store.peek_all("post").unwrap();
    let visible = store.filter("post", Box::new(published)).unwrap();
    assert!(store.record_array(all).unwrap().contains(post));
    assert!(store.record_array(visible).unwrap().contains(post));

    store.delete_record(post).unwrap();
    store.flush().unwrap();
    assert!(store.record_array(all).unwrap().is_empty());
    assert!(store.record_array(visible).unwrap().is_empty());

    let ticket = store.save_record(post).unwrap();
    store.wait(ticket).unwrap();
    assert!(store.record_array(all).unwrap().is_empty());
}

#[test]
fn test_rolled_back_delete_rejoins_arrays() {
    let mut store = blog_store(Server::new());
    let post = store.push("post", json!({"id": "1", "published": true})).unwrap();
    let all = store.peek_all("post").unwrap();
    let visible = store.filter("post", Box::new(published)).unwrap();

    store.delete_record(post).unwrap();
    store.flush().unwrap();
    assert!(store.record_array(visible).unwrap().is_empty());

    store.rollback(post).unwrap();
    store.flush().unwrap();
    assert_eq!(store.record_array(all).unwrap().records(), &[post]);
    assert_eq!(store.record_array(visible).unwrap().records(), &[post]);
}

#[test]
fn test_unload_all_clears_arrays() {
    let mut store = blog_store(Server::new());
    store
        .push_many(
            "post",
            vec![
                json!({"id": "1", "published": true}),
                json!({"id": "2", "published": false}),
            ],
        )
        .unwrap();
    let all = store.peek_all("post").unwrap();
    let visible = store.filter("post", Box::new(published)).unwrap();
    assert_eq!(store.record_array(all).unwrap().len(), 2);
    assert_eq!(store.record_array(visible).unwrap().len(), 1);

    store.unload_all(Some("post")).unwrap();
    store.flush().unwrap();
    assert!(store.record_array(all).unwrap().is_empty());
    assert!(store.record_array(visible).unwrap().is_empty());
    assert!(store.peek_record("post", "1").is_none());

    // The arrays stay registered and fill up again.
    store.push("post", json!({"id": "3", "published": true})).unwrap();
    store.flush().unwrap();
    assert_eq!(store.record_array(all).unwrap().len(), 1);
    assert_eq!(store.record_array(visible).unwrap().len(), 1);
}

#[test]
fn test_find_all_then_peek_all() {
    let server = Server::new();
    server.seed("post", json!({"id": "1"}));
    let mut store = blog_store(server);
    let ticket = store.find_all("post").unwrap();
    let TicketValue::RecordArray(array) = store.wait(ticket).unwrap() else {
        panic!("expected a record array");
    };

    store.push("post", json!({"id": "2"})).unwrap();
    assert_eq!(store.peek_all("post").unwrap(), array);
    store.flush().unwrap();
    assert_eq!(store.record_array(array).unwrap().len(), 2);
}

// --- Filtered Arrays ---

#[test]
fn test_filtered_array_keeps_insertion_order() {
    let mut store = blog_store(Server::new());
    let visible = store.filter("post", Box::new(published)).unwrap();
    let a = store.push("post", json!({"id": "a", "published": true})).unwrap();
    let b = store.push("post", json!({"id": "b", "published": false})).unwrap();
    let c = store.push("post", json!({"id": "c", "published": true})).unwrap();
    store.flush().unwrap();
    assert_eq!(store.record_array(visible).unwrap().records(), &[a, c]);

    store.set_attr(b, "published", json!(true)).unwrap();
    store.set_attr(a, "published", json!(false)).unwrap();
    store.flush().unwrap();
    assert_eq!(store.record_array(visible).unwrap().records(), &[c, b]);
}

// --- Query Arrays ---

#[test]
fn test_query_array_ignores_new_records() {
    let server = Server::new();
    server.seed("post", json!({"id": "1", "published": true}));
    let mut store = blog_store(server);
    let ticket = store.query("post", json!({"published": true})).unwrap();
    let TicketValue::RecordArray(array) = store.wait(ticket).unwrap() else {
        panic!("expected a record array");
    };
    assert_eq!(store.record_array(array).unwrap().meta(), Some(&json!({"total": 1})));

    store.push("post", json!({"id": "2", "published": true})).unwrap();
    store.flush().unwrap();
    assert_eq!(store.record_array(array).unwrap().len(), 1);

    // Destroyed members still drop out.
    let post = store.peek_record("post", "1").unwrap();
    let ticket = store.destroy_record(post).unwrap();
    store.wait(ticket).unwrap();
    assert!(store.record_array(array).unwrap().is_empty());
}
