use googletest::{
    assert_that,
    prelude::{eq, none},
};
use hearth_session::SessionData;
use serde::{Deserialize, Serialize};

use crate::fixtures::{Harness, SessionFixture};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[tokio::test]
async fn typed_values_can_be_stored_and_retrieved() {
    let harness = Harness::default();
    let (session, _commit) = harness.manager.start(None).await.unwrap();

    let user = User {
        id: 7,
        name: "ada".into(),
    };
    let previous = session.set("user", &user).unwrap();
    assert_that!(&previous, none());

    let stored: User = session.get("user").unwrap().unwrap();
    assert_that!(&stored, eq(&user));
    assert_eq!(
        session.get_raw("user"),
        Some(serde_json::json!({ "id": 7, "name": "ada" }))
    );
}

#[tokio::test]
async fn set_returns_the_previous_value() {
    let harness = Harness::default();
    let (session, _commit) = harness.manager.start(None).await.unwrap();

    session.set("counter", 1).unwrap();
    let previous = session.set("counter", 2).unwrap();
    assert_eq!(previous, Some(serde_json::json!(1)));
}

#[tokio::test]
async fn get_fails_if_the_value_has_an_unexpected_shape() {
    let harness = Harness::default();
    let (session, _commit) = harness.manager.start(None).await.unwrap();
    session.set("user", "not-a-user").unwrap();

    let err = session.get::<User>("user").unwrap_err();
    assert_eq!(err.key, "user");
}

#[tokio::test]
async fn get_returns_none_for_missing_keys() {
    let harness = Harness::default();
    let (session, _commit) = harness.manager.start(None).await.unwrap();

    assert_that!(&session.get::<User>("user").unwrap(), none());
    assert!(!session.has("user"));
}

#[tokio::test]
async fn delete_removes_a_single_key() {
    let harness = Harness::default();
    let fixture = SessionFixture {
        data: [
            ("a".to_owned(), serde_json::json!(1)),
            ("b".to_owned(), serde_json::json!(2)),
        ]
        .into(),
        ..Default::default()
    };
    let cookie_header = fixture.setup(&harness).await;
    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();

    assert_eq!(session.delete("a"), Some(serde_json::json!(1)));
    assert_eq!(session.delete("a"), None);
    commit.commit().await.unwrap();

    let record = harness.record(&fixture.id).await.unwrap();
    let expected: SessionData = [("b".to_owned(), serde_json::json!(2))].into();
    assert_eq!(record.data, expected);
}

#[tokio::test]
async fn assign_merges_and_replace_overwrites() {
    let harness = Harness::default();
    let (session, _commit) = harness.manager.start(None).await.unwrap();
    session.set("a", 1).unwrap();
    session.set("b", 2).unwrap();

    session.assign(
        [
            ("b".to_owned(), serde_json::json!(20)),
            ("c".to_owned(), serde_json::json!(30)),
        ]
        .into(),
    );
    let expected: SessionData = [
        ("a".to_owned(), serde_json::json!(1)),
        ("b".to_owned(), serde_json::json!(20)),
        ("c".to_owned(), serde_json::json!(30)),
    ]
    .into();
    assert_eq!(session.data(), expected);

    session.replace([("z".to_owned(), serde_json::json!(true))].into());
    let expected: SessionData = [("z".to_owned(), serde_json::json!(true))].into();
    assert_eq!(session.data(), expected);
}

#[tokio::test]
async fn update_can_suspend_before_producing_the_new_data() {
    let harness = Harness::default();
    let (session, _commit) = harness.manager.start(None).await.unwrap();
    session.set("visits", 1).unwrap();

    session
        .update(|mut data| async move {
            tokio::task::yield_now().await;
            let visits = data["visits"].as_u64().unwrap();
            data.insert("visits".into(), serde_json::json!(visits + 1));
            data
        })
        .await;

    assert_eq!(session.get::<u64>("visits").unwrap(), Some(2));
}

#[tokio::test]
async fn reads_do_not_mark_the_session_as_modified() {
    let mut config = hearth_session::SessionConfig::default();
    config.state.rolling = false;
    let harness = Harness::new(config);
    let fixture = SessionFixture {
        data: [("a".to_owned(), serde_json::json!(1))].into(),
        ..Default::default()
    };
    let cookie_header = fixture.setup(&harness).await;
    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();

    let _ = session.get::<u64>("a").unwrap();
    let _ = session.has("b");
    let _ = session.data();

    assert_that!(&commit.commit().await.unwrap(), none());
    assert!(harness.call_tracker.writes().await.is_empty());
}

#[tokio::test]
async fn deleting_a_missing_key_still_counts_as_a_modification() {
    let mut config = hearth_session::SessionConfig::default();
    config.state.rolling = false;
    let harness = Harness::new(config);
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;
    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();

    session.delete("missing");

    assert!(commit.commit().await.unwrap().is_some());
    assert_eq!(harness.call_tracker.writes().await, ["set existing"]);
}
