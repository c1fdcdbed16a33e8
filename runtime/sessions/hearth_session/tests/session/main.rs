use std::time::Duration;

use assertions::is_removal_cookie;
use fixtures::{FailingBackend, Harness, SessionFixture};
use googletest::{
    assert_that,
    prelude::{eq, none, not},
};
use hearth_session::{
    Session, SessionCommit, SessionConfig, SessionId, SessionManager, SessionStore,
    errors::{CommitError, RegenerateError},
    store::errors::LoadError,
};
use helpers::SetCookie;

mod operations;

static_assertions::assert_impl_all!(Session: Send, Sync);
static_assertions::assert_impl_all!(SessionCommit: Send, Sync);
static_assertions::assert_impl_all!(SessionManager: Send, Sync, Clone);

const SEVEN_DAYS: i64 = 60 * 60 * 24 * 7;

#[tokio::test]
async fn eager_sessions_are_persisted_and_sent_even_if_untouched() {
    let harness = Harness::default();

    let (session, commit) = harness.manager.start(None).await.unwrap();
    assert_eq!(session.id(), Some(SessionId::new("id-1")));
    assert!(session.is_new());

    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), SessionId::new("id-1"));
    assert_eq!(cookie.max_age(), SEVEN_DAYS);

    assert_eq!(harness.call_tracker.operation_log().await, ["set id-1"]);
    let record = harness.record(&SessionId::new("id-1")).await.unwrap();
    assert!(record.data.is_empty());
    assert!(!session.is_new());
}

#[tokio::test]
async fn lazy_sessions_are_not_persisted_nor_sent_if_untouched() {
    let harness = Harness::lazy();

    let (session, commit) = harness.manager.start(None).await.unwrap();
    assert_that!(&session.id(), none());
    assert_that!(&session.get::<u64>("visits").unwrap(), none());

    let cookie = commit.commit().await.unwrap();
    assert_that!(&cookie, none());
    harness.call_tracker.assert_store_was_untouched().await;
}

#[tokio::test]
async fn lazy_sessions_are_persisted_once_modified() {
    let harness = Harness::lazy();

    let (session, commit) = harness.manager.start(None).await.unwrap();
    session.set("visits", 1).unwrap();
    assert_that!(&session.id(), none());

    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), SessionId::new("id-1"));
    assert_eq!(session.id(), Some(SessionId::new("id-1")));

    let record = harness.record(&cookie.id()).await.unwrap();
    assert_eq!(record.data["visits"], serde_json::json!(1));
}

#[tokio::test]
async fn an_empty_session_cookie_is_treated_as_absent() {
    let harness = Harness::lazy();

    let (session, commit) = harness.manager.start(Some("sid=; theme=dark")).await.unwrap();
    assert!(session.is_new());

    // No lookup, and nothing to clear.
    assert_that!(&commit.commit().await.unwrap(), none());
    harness.call_tracker.assert_store_was_untouched().await;
}

#[tokio::test]
async fn other_cookies_are_ignored() {
    let harness = Harness::lazy();
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let header = format!("theme=dark; {cookie_header}; lang=en");
    let (session, _commit) = harness.manager.start(Some(&header)).await.unwrap();
    assert_eq!(session.id(), Some(fixture.id.clone()));
    assert!(!session.is_new());
}

#[tokio::test]
async fn rolling_sessions_are_refreshed_even_if_untouched() {
    let harness = Harness::default();
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;
    harness.clock.advance(Duration::from_secs(60));

    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    assert!(!session.is_new());

    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), fixture.id);
    assert_eq!(cookie.max_age(), SEVEN_DAYS);

    assert_eq!(
        harness.call_tracker.operation_log().await,
        ["get existing", "set existing"]
    );
    let record = harness.record(&fixture.id).await.unwrap();
    let expected = harness
        .clock
        .now()
        .checked_add(Duration::from_secs(SEVEN_DAYS as u64))
        .unwrap();
    assert_eq!(record.expires_at, expected);
}

#[tokio::test]
async fn non_rolling_sessions_are_left_alone_if_untouched() {
    let mut config = SessionConfig::default();
    config.state.rolling = false;
    let harness = Harness::new(config);
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let (_session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    assert_that!(&commit.commit().await.unwrap(), none());
    assert_eq!(harness.call_tracker.operation_log().await, ["get existing"]);
}

#[tokio::test]
async fn non_rolling_sessions_are_saved_when_modified() {
    let mut config = SessionConfig::default();
    config.state.rolling = false;
    let harness = Harness::new(config);
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    session.set("user.id", "ada").unwrap();

    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), fixture.id);
    let record = harness.record(&fixture.id).await.unwrap();
    assert_eq!(record.data["user.id"], serde_json::json!("ada"));
}

#[tokio::test]
async fn a_stale_cookie_is_cleared_if_no_new_session_is_sent() {
    let harness = Harness::lazy();

    let (session, commit) = harness.manager.start(Some("sid=ghost")).await.unwrap();
    assert!(session.is_new());
    assert_that!(&session.id(), none());

    let cookie = commit.commit().await.unwrap().unwrap();
    assert_that!(cookie.as_str(), is_removal_cookie());
    assert_eq!(harness.call_tracker.operation_log().await, ["get ghost"]);
}

#[tokio::test]
async fn a_stale_cookie_is_replaced_by_the_new_session_cookie() {
    let harness = Harness::default();

    let (_session, commit) = harness.manager.start(Some("sid=ghost")).await.unwrap();

    let cookie = commit.commit().await.unwrap().unwrap();
    assert_that!(cookie.as_str(), not(is_removal_cookie()));
    assert_eq!(SetCookie::parse(&cookie).id(), SessionId::new("id-1"));
}

#[tokio::test]
async fn expired_sessions_are_treated_as_missing() {
    let harness = Harness::default();
    let fixture = SessionFixture {
        data: [("user.id".to_owned(), serde_json::json!("ada"))].into(),
        ttl: Some(Duration::from_secs(10)),
        ..Default::default()
    };
    let cookie_header = fixture.setup(&harness).await;
    harness.clock.advance(Duration::from_secs(10));

    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    assert!(session.is_new());
    assert!(!session.has("user.id"));

    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), SessionId::new("id-1"));
}

#[tokio::test]
async fn initial_data_is_used_for_new_sessions() {
    let manager = SessionManager::builder(fixtures::store())
        .initial_data(|| [("theme".to_owned(), serde_json::json!("dark"))].into())
        .build()
        .unwrap();

    let (session, _commit) = manager.start(None).await.unwrap();
    assert_eq!(session.get::<String>("theme").unwrap().as_deref(), Some("dark"));
}

#[tokio::test]
async fn destroying_twice_is_the_same_as_destroying_once() {
    let harness = Harness::default();
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    session.destroy().await.unwrap();
    session.destroy().await.unwrap();
    assert!(session.is_destroyed());

    let cookie = commit.commit().await.unwrap().unwrap();
    assert_that!(cookie.as_str(), is_removal_cookie());
    assert_eq!(harness.call_tracker.writes().await, ["delete existing"]);
    assert_that!(&harness.record(&fixture.id).await, none());
}

#[tokio::test]
async fn destroy_deletes_the_record_right_away() {
    let harness = Harness::default();
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let (session, _commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    session.destroy().await.unwrap();

    // The commit hasn't run yet.
    assert_that!(&harness.record(&fixture.id).await, none());
}

#[tokio::test]
async fn destroying_an_unsaved_lazy_session_touches_nothing() {
    let harness = Harness::lazy();

    let (session, commit) = harness.manager.start(None).await.unwrap();
    session.set("visits", 1).unwrap();
    session.destroy().await.unwrap();

    assert_that!(&commit.commit().await.unwrap(), none());
    harness.call_tracker.assert_store_was_untouched().await;
}

#[tokio::test]
async fn mutations_after_destroy_are_ignored() {
    let harness = Harness::default();
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    session.destroy().await.unwrap();

    session.set("user.id", "ada").unwrap();
    session.update(|mut data| async move {
        data.insert("visits".into(), serde_json::json!(1));
        data
    })
    .await;
    assert!(!session.has("user.id"));
    assert!(!session.has("visits"));

    // Saving a destroyed session doesn't resurrect it.
    session.save().await.unwrap();
    commit.commit().await.unwrap();
    assert_eq!(harness.call_tracker.writes().await, ["delete existing"]);
    assert_that!(&harness.record(&fixture.id).await, none());
}

#[tokio::test]
async fn regenerate_moves_the_data_to_a_new_id() {
    let harness = Harness::default();
    let fixture = SessionFixture {
        data: [("user.id".to_owned(), serde_json::json!("ada"))].into(),
        ..Default::default()
    };
    let cookie_header = fixture.setup(&harness).await;

    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    let new_id = session.regenerate().await.unwrap();
    assert_eq!(new_id, SessionId::new("id-1"));
    assert_eq!(session.id(), Some(new_id.clone()));
    assert!(session.is_new());

    // The previous id can't be resolved anymore, even before the commit.
    assert_that!(&harness.record(&fixture.id).await, none());

    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), new_id);
    let record = harness.record(&new_id).await.unwrap();
    assert_eq!(record.data, fixture.data);
    assert_eq!(
        harness.call_tracker.writes().await,
        ["delete existing", "set id-1"]
    );
}

#[tokio::test]
async fn regenerating_a_lazy_session_forces_a_write() {
    let harness = Harness::lazy();

    let (session, commit) = harness.manager.start(None).await.unwrap();
    let new_id = session.regenerate().await.unwrap();

    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), new_id);
    // There was no previous record to delete.
    assert_eq!(harness.call_tracker.writes().await, ["set id-1"]);
}

#[tokio::test]
async fn regenerating_a_destroyed_session_fails() {
    let harness = Harness::default();

    let (session, _commit) = harness.manager.start(None).await.unwrap();
    session.destroy().await.unwrap();

    let outcome = session.regenerate().await;
    assert!(matches!(outcome, Err(RegenerateError::Destroyed(_))));

    // The failed call didn't consume an id.
    let (session, _commit) = harness.manager.start(None).await.unwrap();
    assert_eq!(session.id(), Some(SessionId::new("id-2")));
}

#[tokio::test]
async fn save_persists_right_away_and_later_changes_are_committed() {
    let harness = Harness::default();
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    session.set("step", 1).unwrap();
    session.save().await.unwrap();
    let record = harness.record(&fixture.id).await.unwrap();
    assert_eq!(record.data["step"], serde_json::json!(1));

    session.set("step", 2).unwrap();
    commit.commit().await.unwrap();
    let record = harness.record(&fixture.id).await.unwrap();
    assert_eq!(record.data["step"], serde_json::json!(2));
    assert_eq!(
        harness.call_tracker.writes().await,
        ["set existing", "set existing"]
    );
}

#[tokio::test]
async fn an_unchanged_rolling_session_is_written_once_after_save() {
    let harness = Harness::default();
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let (session, commit) = harness.manager.start(Some(&cookie_header)).await.unwrap();
    session.save().await.unwrap();

    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), fixture.id);
    assert_eq!(harness.call_tracker.writes().await, ["set existing"]);
}

#[tokio::test]
async fn save_assigns_an_id_to_a_lazy_session() {
    let harness = Harness::lazy();

    let (session, commit) = harness.manager.start(None).await.unwrap();
    session.save().await.unwrap();
    assert_eq!(session.id(), Some(SessionId::new("id-1")));
    assert!(!session.is_new());

    // The commit has nothing left to write, but the cookie must still reach the client.
    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());
    assert_eq!(cookie.id(), SessionId::new("id-1"));
    assert_eq!(harness.call_tracker.writes().await, ["set id-1"]);
}

#[tokio::test]
async fn repeated_saves_keep_the_last_state() {
    let harness = Harness::lazy();

    let (session, _commit) = harness.manager.start(None).await.unwrap();
    for step in 0..3 {
        session.set("step", step).unwrap();
        session.save().await.unwrap();
    }

    let record = harness.record(&SessionId::new("id-1")).await.unwrap();
    assert_eq!(record.data["step"], serde_json::json!(2));
    assert_eq!(harness.call_tracker.writes().await.len(), 3);
}

#[tokio::test]
async fn load_failures_are_reported() {
    let manager =
        SessionManager::new(SessionStore::new(FailingBackend), SessionConfig::default()).unwrap();

    let outcome = manager.start(Some("sid=abc")).await;
    assert!(matches!(outcome, Err(LoadError::Other(_))));
}

#[tokio::test]
async fn commit_failures_are_reported() {
    let manager =
        SessionManager::new(SessionStore::new(FailingBackend), SessionConfig::default()).unwrap();

    let (session, commit) = manager.start(None).await.unwrap();
    session.set("visits", 1).unwrap();

    assert!(matches!(
        session.save().await,
        Err(CommitError::SaveError(_))
    ));
    assert!(matches!(
        commit.commit().await,
        Err(CommitError::SaveError(_))
    ));
}

#[tokio::test]
async fn a_failed_destroy_can_be_retried_by_the_commit() {
    let manager =
        SessionManager::new(SessionStore::new(FailingBackend), SessionConfig::default()).unwrap();

    let (session, commit) = manager.start(None).await.unwrap();
    assert!(matches!(
        session.destroy().await,
        Err(CommitError::DeleteError(_))
    ));
    assert!(session.is_destroyed());
    // The deletion wasn't recorded as done, so the commit tries again.
    assert!(matches!(
        commit.commit().await,
        Err(CommitError::DeleteError(_))
    ));
}

#[tokio::test]
async fn concurrent_requests_on_the_same_session_last_writer_wins() {
    let harness = Harness::default();
    let fixture = SessionFixture::default();
    let cookie_header = fixture.setup(&harness).await;

    let first = harness.manager.start(Some(&cookie_header));
    let second = harness.manager.start(Some(&cookie_header));
    let ((a, a_commit), (b, b_commit)) = {
        let (first, second) = tokio::join!(first, second);
        (first.unwrap(), second.unwrap())
    };
    a.set("from", "a").unwrap();
    b.set("from", "b").unwrap();
    a_commit.commit().await.unwrap();
    b_commit.commit().await.unwrap();

    // Last writer wins.
    let record = harness.record(&fixture.id).await.unwrap();
    assert_eq!(record.data["from"], serde_json::json!("b"));
    assert_that!(harness.call_tracker.writes().await.len(), eq(2));
}
