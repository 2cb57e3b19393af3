//! Property-based tests for ordered sets, relationship merging and
//! filtered record arrays.

mod common;

use common::{blog_store, Server};
use proptest::prelude::*;
use record_graph::{
    OrderedSet, Properties, RecordView, StoreEvent, SubscriptionConfig, SubscriptionFilter,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

// --- OrderedSet ---

#[derive(Clone, Debug)]
enum SetOp {
    Add(u8),
    Insert(u8, usize),
    Delete(u8),
}

fn set_op() -> impl Strategy<Value = SetOp> {
    prop_oneof![
        (0u8..16).prop_map(SetOp::Add),
        (0u8..16, 0usize..20).prop_map(|(v, i)| SetOp::Insert(v, i)),
        (0u8..16).prop_map(SetOp::Delete),
    ]
}

proptest! {
    #[test]
    fn ordered_set_matches_vec_model(ops in prop::collection::vec(set_op(), 0..64)) {
        let mut set = OrderedSet::new();
        let mut model: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                SetOp::Add(v) => {
                    let fresh = !model.contains(&v);
                    if fresh {
                        model.push(v);
                    }
                    prop_assert_eq!(set.add(v), fresh);
                }
                SetOp::Insert(v, i) => {
                    let fresh = !model.contains(&v);
                    if fresh {
                        model.insert(i.min(model.len()), v);
                    }
                    prop_assert_eq!(set.add_with_index(v, Some(i)), fresh);
                }
                SetOp::Delete(v) => {
                    let present = model.contains(&v);
                    model.retain(|x| *x != v);
                    prop_assert_eq!(set.delete(&v), present);
                }
            }
            prop_assert_eq!(set.as_slice(), model.as_slice());
        }

        for v in 0u8..16 {
            prop_assert_eq!(set.has(&v), model.contains(&v));
            prop_assert_eq!(set.index_of(&v), model.iter().position(|x| *x == v));
        }
    }
}

// --- Push ---

fn attr_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Pushing a payload the store already holds changes nothing.
    #[test]
    fn repeated_push_is_a_no_op(
        title in prop::option::of(attr_value()),
        published in prop::option::of(attr_value()),
    ) {
        let mut store = blog_store(Server::new());
        let mut payload = Map::new();
        payload.insert("id".to_string(), json!("1"));
        if let Some(title) = title {
            payload.insert("title".to_string(), title);
        }
        if let Some(published) = published {
            payload.insert("published".to_string(), published);
        }
        let payload = Value::Object(payload);

        let post = store.push("post", payload.clone()).unwrap();
        store.flush().unwrap();
        let before = store.record(post).unwrap().attributes();
        let sub = store.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::properties(),
            ..Default::default()
        });

        prop_assert_eq!(store.push("post", payload).unwrap(), post);
        store.flush().unwrap();
        prop_assert_eq!(store.record(post).unwrap().attributes(), before);
        prop_assert!(!store.flags(post).unwrap().is_dirty);
        prop_assert!(store.changed_attributes(post).unwrap().is_empty());
        let notified = sub
            .drain()
            .into_iter()
            .any(|e| matches!(e, StoreEvent::PropertiesChanged { .. }));
        prop_assert!(!notified);
    }
}

// --- Relationships ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Unsaved members stay at the end of a has-many, in creation order,
    /// whatever the server says about the saved ones.
    #[test]
    fn server_updates_preserve_new_members(
        pushes in prop::collection::vec(prop::collection::btree_set(0u8..12, 0..6), 1..4),
        drafts in 0usize..4,
    ) {
        let mut store = blog_store(Server::new());
        let post = store.push("post", json!({"id": "p"})).unwrap();
        let mut created = Vec::new();
        for i in 0..drafts {
            let draft = store
                .has_many_create_record(
                    post,
                    "comments",
                    Properties::new().value("body", json!(format!("draft {}", i))),
                )
                .unwrap();
            created.push(draft);
        }

        for ids in pushes {
            let ids: Vec<String> = ids.iter().map(|id| format!("c{}", id)).collect();
            store.push("post", json!({"id": "p", "comments": ids})).unwrap();

            let mut expected = Vec::new();
            for id in &ids {
                expected.push(store.record_for_id("comment", id).unwrap());
            }
            expected.extend(created.iter().copied());
            let actual = store.many_array(post, "comments").unwrap().records().to_vec();
            prop_assert_eq!(actual, expected);
        }
    }
}

// --- Record Arrays ---

#[derive(Clone, Debug)]
enum PostOp {
    Push(u8, bool),
    Publish(u8, bool),
    Unload(u8),
}

fn post_op() -> impl Strategy<Value = PostOp> {
    prop_oneof![
        (0u8..8, any::<bool>()).prop_map(|(id, p)| PostOp::Push(id, p)),
        (0u8..8, any::<bool>()).prop_map(|(id, p)| PostOp::Publish(id, p)),
        (0u8..8).prop_map(PostOp::Unload),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn filtered_array_tracks_predicate(ops in prop::collection::vec(post_op(), 0..40)) {
        let mut store = blog_store(Server::new());
        let array = store
            .filter(
                "post",
                Box::new(|view: &RecordView<'_>| view.attr("published") == Some(&json!(true))),
            )
            .unwrap();

        for op in ops {
            match op {
                PostOp::Push(id, published) => {
                    store
                        .push("post", json!({"id": id.to_string(), "published": published}))
                        .unwrap();
                }
                PostOp::Publish(id, published) => {
                    if let Some(post) = store.peek_record("post", &id.to_string()) {
                        store.set_attr(post, "published", json!(published)).unwrap();
                    }
                }
                PostOp::Unload(id) => {
                    if let Some(post) = store.peek_record("post", &id.to_string()) {
                        store.unload_record(post).unwrap();
                    }
                }
            }
            store.flush().unwrap();

            let records = store.record_array(array).unwrap().records().to_vec();
            let unique: BTreeSet<_> = records.iter().copied().collect();
            prop_assert_eq!(unique.len(), records.len());

            let mut expected = BTreeSet::new();
            for id in 0u8..8 {
                if let Some(post) = store.peek_record("post", &id.to_string()) {
                    if store.attr(post, "published").unwrap() == Some(json!(true)) {
                        expected.insert(post);
                    }
                }
            }
            prop_assert_eq!(unique, expected);
        }
    }
}
