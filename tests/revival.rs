use std::collections::BTreeMap;
use std::sync::Arc;

use insta::assert_snapshot;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::datetime;
use typecache::cache::{CacheConfig, CacheError, ClassCache, CodecError, TypeRegistry};
use typecache::{Model, TYPE_TAG, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct User {
    id: u64,
    first_name: String,
    last_name: String,
    #[serde(with = "time::serde::rfc3339")]
    joined_at: OffsetDateTime,
    #[serde(skip)]
    revived: bool,
}

impl Model for User {
    fn after_revive(&mut self) {
        self.revived = true;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Team {
    id: u64,
    name: String,
}

impl Model for Team {
    const MODEL_NAME: Option<&'static str> = Some("team");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    id: u64,
    code: String,
    #[serde(with = "time::serde::rfc3339")]
    at: OffsetDateTime,
}

impl Model for Event {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Label(String);

impl Model for Label {}

fn cache() -> ClassCache {
    let cache = ClassCache::in_memory(Arc::new(TypeRegistry::new()), CacheConfig::default());
    cache.register::<User>(None).expect("user registers");
    cache.register::<Team>(None).expect("team registers");
    cache
}

fn ada() -> User {
    User {
        id: 1,
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        joined_at: datetime!(2024-03-01 12:30:45.123 UTC),
        revived: false,
    }
}

#[test]
fn envelope_carries_the_type_tag() {
    let cache = cache();
    let user = cache.instance(ada()).expect("registered");

    let text = cache.encode(&Value::from(user)).expect("encodes");
    assert_snapshot!("user_envelope", text);
}

#[test]
fn round_trip_rebuilds_an_equal_instance() {
    let cache = cache();
    let user = cache.instance(ada()).expect("registered");

    let text = cache.encode(&Value::from(user.clone())).expect("encodes");
    let decoded = cache.decode(&text).expect("decodes");

    let revived = decoded.as_instance().expect("instance");
    assert_eq!(revived.type_name(), "User");
    assert_eq!(revived, &user);

    let typed = revived.downcast_ref::<User>().expect("user");
    assert_eq!(typed.joined_at, datetime!(2024-03-01 12:30:45.123 UTC));
    assert!(typed.revived, "post-construction hook runs");
}

#[test]
fn decode_as_downcasts_the_root() {
    let cache = cache();
    let text = cache
        .encode(&Value::from(cache.instance(ada()).expect("registered")))
        .expect("encodes");

    let user = cache.decode_as::<User>(&text).expect("decodes").expect("user");
    assert_eq!(user.first_name, "Ada");
    assert!(cache.decode_as::<Team>(&text).expect("decodes").is_none());
}

#[test]
fn nested_graphs_keep_every_instance_type() {
    let cache = cache();
    let user = cache.instance(ada()).expect("registered");
    let team = cache
        .instance(Team {
            id: 9,
            name: "Engines".to_string(),
        })
        .expect("registered");

    let mut graph = BTreeMap::new();
    graph.insert("owner".to_string(), Value::from(user.clone()));
    graph.insert(
        "members".to_string(),
        Value::Array(vec![Value::from(team.clone()), Value::from(user.clone())]),
    );
    graph.insert(
        "at".to_string(),
        Value::from(datetime!(2023-11-05 08:09:10.500 UTC)),
    );
    let graph = Value::Object(graph);

    let decoded = cache
        .decode(&cache.encode(&graph).expect("encodes"))
        .expect("decodes");
    assert_eq!(decoded, graph);

    let members = decoded
        .get("members")
        .and_then(Value::as_array)
        .expect("members");
    assert_eq!(members[0].as_instance().map(|i| i.type_name()), Some("team"));
    assert_eq!(members[1].as_instance().map(|i| i.type_name()), Some("User"));
}

#[test]
fn unregistered_tags_decode_to_absent_members() {
    let writer = cache();
    let reader = ClassCache::in_memory(Arc::new(TypeRegistry::new()), CacheConfig::default());
    reader.register::<Team>(None).expect("team registers");

    let mut graph = BTreeMap::new();
    graph.insert(
        "owner".to_string(),
        Value::from(writer.instance(ada()).expect("registered")),
    );
    graph.insert("title".to_string(), Value::from("Notes"));
    let text = writer.encode(&Value::Object(graph)).expect("encodes");

    let decoded = reader.decode(&text).expect("decode does not fail");
    let fields = decoded.as_object().expect("object");
    assert!(!fields.contains_key("owner"));
    assert_eq!(fields.get("title"), Some(&Value::from("Notes")));

    let root = writer
        .encode(&Value::from(writer.instance(ada()).expect("registered")))
        .expect("encodes");
    assert!(reader.decode(&root).expect("decodes").is_absent());
}

#[test]
fn date_strings_are_revived_and_others_left_alone() {
    let cache = cache();
    let decoded = cache
        .decode(r#"{"a":"2024-03-01T12:30:45.123Z","b":"2024-03-01","c":"noon"}"#)
        .expect("decodes");

    assert_eq!(
        decoded.get("a"),
        Some(&Value::Timestamp(datetime!(2024-03-01 12:30:45.123 UTC)))
    );
    assert_eq!(decoded.get("b"), Some(&Value::from("2024-03-01")));
    assert_eq!(decoded.get("c"), Some(&Value::from("noon")));
}

#[test]
fn instance_members_keep_their_stored_text() {
    let cache = cache();
    cache.register::<Event>(None).expect("event registers");
    let event = Event {
        id: 1,
        code: "2024-03-01T12:30:45Z".to_string(),
        at: datetime!(2024-03-01 12:30:45.123456 UTC),
    };

    let text = cache
        .encode(&Value::from(cache.instance(event.clone()).expect("registered")))
        .expect("encodes");
    assert_eq!(
        text,
        r#"{"__cachedname":"Event","at":"2024-03-01T12:30:45.123456Z","code":"2024-03-01T12:30:45Z","id":1}"#
    );

    let decoded = cache
        .decode_as::<Event>(&text)
        .expect("decodes")
        .expect("event");
    assert_eq!(*decoded, event);
}

#[test]
fn constructor_failures_fail_the_decode() {
    let cache = cache();
    let text = format!(r#"{{"{TYPE_TAG}":"team","id":"nine","name":"Engines"}}"#);

    let err = cache.decode(&text).expect_err("bad id");
    assert!(matches!(
        err,
        CacheError::Codec(CodecError::Construct { ref ty, .. }) if ty == "team"
    ));
}

#[test]
fn non_keyed_encodings_are_rejected() {
    let cache = cache();
    cache.register::<Label>(None).expect("label registers");
    let label = cache.instance(Label("x".to_string())).expect("registered");

    let err = cache.encode(&Value::from(label)).expect_err("not keyed");
    assert!(matches!(err, CacheError::Codec(CodecError::NotKeyed { .. })));
}
