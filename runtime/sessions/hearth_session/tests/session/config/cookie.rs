use crate::fixtures::Harness;
use crate::helpers::SetCookie;
use hearth_session::SessionConfig;
use hearth_session::config::{SameSite, SessionCookieConfig};

#[test]
fn defaults() {
    let config = SessionCookieConfig::default();
    assert_eq!(config.name, "sid");
    assert_eq!(config.path.as_deref(), Some("/"));
    assert_eq!(config.domain, None);
    assert!(!config.secure);
    assert!(config.http_only);
    assert_eq!(config.same_site, SameSite::Lax);
}

#[test]
fn same_site_accepts_both_spellings() {
    for raw in ["none", "None"] {
        let config: SessionCookieConfig =
            serde_json::from_value(serde_json::json!({ "same_site": raw })).unwrap();
        assert_eq!(config.same_site, SameSite::None);
    }
}

#[tokio::test]
async fn the_session_cookie_honours_the_configured_attributes() {
    let mut config = SessionConfig::default();
    config.cookie.name = "app_session".into();
    config.cookie.domain = Some("example.com".into());
    config.cookie.path = Some("/app".into());
    config.cookie.secure = true;
    config.cookie.http_only = false;
    config.cookie.same_site = SameSite::Strict;
    let harness = Harness::new(config);

    let (_session, commit) = harness.manager.start(None).await.unwrap();
    let cookie = SetCookie::parse(&commit.commit().await.unwrap().unwrap());

    assert_eq!(cookie.name, "app_session");
    assert_eq!(cookie.attribute("Domain"), Some("example.com"));
    assert_eq!(cookie.attribute("Path"), Some("/app"));
    assert_eq!(cookie.attribute("SameSite"), Some("Strict"));
    assert_eq!(cookie.attribute("Secure"), Some(""));
    assert_eq!(cookie.attribute("HttpOnly"), None);
}

#[tokio::test]
async fn the_session_id_is_read_from_the_configured_cookie() {
    let mut config = SessionConfig::default();
    config.cookie.name = "app_session".into();
    let harness = Harness::new(config);

    // A `sid` cookie means nothing to this manager.
    let (_session, _commit) = harness.manager.start(Some("sid=abc")).await.unwrap();
    harness.call_tracker.assert_store_was_untouched().await;

    let (_session, _commit) = harness
        .manager
        .start(Some("app_session=abc"))
        .await
        .unwrap();
    assert_eq!(harness.call_tracker.operation_log().await, ["get abc"]);
}
