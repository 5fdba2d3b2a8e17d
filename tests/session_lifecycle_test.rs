//! Connect handshake, cookie handling, login chaining and game sessions.

use glasslab_sdk::Client;
use glasslab_sdk::test_utils::{MockHttpClient, ScriptedResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn connect_and_wait(
    client: &Arc<Client>,
    dir: &std::path::Path,
    uri: &str,
) -> glasslab_sdk::ResponseEnvelope {
    let _ = env_logger::builder().is_test(true).try_init();
    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .connect(
            dir,
            "TESTGAME",
            uri,
            Some(Box::new(move |envelope| {
                let _ = tx.send(envelope);
            })),
        )
        .await;
    timeout(Duration::from_secs(5), rx).await.unwrap().unwrap()
}

#[tokio::test]
async fn connect_follows_gateway_redirect_and_applies_throttle_overrides() {
    let mock = Arc::new(MockHttpClient::new());
    mock.script(
        "/sdk/connect",
        ScriptedResponse::ok("http://redirected.test")
            .with_header("Set-Cookie", "connect.sid=tok123; Path=/"),
    );
    mock.script(
        "/data/config/",
        ScriptedResponse::ok(r#"{"eventsPeriodSecs":1,"eventsMinSize":1,"eventsMaxSize":4}"#),
    );

    let client = Client::new(mock.clone());
    let dir = tempfile::tempdir().unwrap();
    let envelope = connect_and_wait(&client, dir.path(), "http://server.test").await;

    assert!(envelope.is_ok());
    assert!(client.is_connected());
    assert_eq!(client.get_connect_uri(), "http://redirected.test");
    // The config fetch already ran against the redirected server.
    let config_requests = mock.requests_to("/data/config/TESTGAME");
    assert_eq!(config_requests.len(), 1);
    assert!(config_requests[0].url.starts_with("http://redirected.test"));

    // Cookie from the gateway is cached, in full and parsed form.
    assert_eq!(client.get_cookie(true), "connect.sid=tok123; Path=/");
    assert_eq!(client.get_cookie(false), "tok123");

    // With the overridden throttle (min 1, period 1s), a single event flows
    // out on its own once the game timer runs.
    client.start_game_timer();
    client.add_telem_event_value("ready", true);
    client.save_telem_event("Boot").await;
    sleep(Duration::from_millis(1600)).await;
    assert_eq!(mock.requests_to("/api/v2/data/events").len(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn connect_is_idempotent_and_keeps_the_store() {
    let mock = Arc::new(MockHttpClient::new());
    let client = Client::new(mock.clone());
    let dir = tempfile::tempdir().unwrap();

    assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());
    client.save_telem_event("BeforeReconnect").await;

    // Reconnect: another handshake, same store, queue untouched.
    assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());
    assert_eq!(mock.requests_to("/sdk/connect").len(), 2);

    client.force_flush_telemetry().await;
    sleep(Duration::from_millis(300)).await;
    let flushed = mock.requests_to("/api/v2/data/events");
    assert_eq!(flushed.len(), 1);
    let batch: serde_json::Value =
        serde_json::from_slice(flushed[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(batch[0]["eventName"], "BeforeReconnect");

    client.shutdown().await;
}

#[tokio::test]
async fn login_updates_the_session_and_chains_a_device_update() {
    let mock = Arc::new(MockHttpClient::new());
    mock.script(
        "/auth/login/glasslab",
        ScriptedResponse::ok(r#"{"id":42,"username":"sam"}"#)
            .with_header("Set-Cookie", "connect.sid=fresh; Path=/"),
    );

    let client = Client::new(mock.clone());
    let dir = tempfile::tempdir().unwrap();
    assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());

    let (tx, rx) = tokio::sync::oneshot::channel();
    client.login(
        "sam",
        "secret",
        None,
        Some(Box::new(move |envelope| {
            let _ = tx.send(envelope);
        })),
    );
    let envelope = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert!(envelope.is_ok());
    assert_eq!(client.get_user_id(), 42);
    assert_eq!(client.get_cookie(false), "fresh");

    // The automatic device update rides behind the login.
    sleep(Duration::from_millis(400)).await;
    let device_updates = mock.requests_to("/data/game/device");
    assert_eq!(device_updates.len(), 1);
    let body = String::from_utf8(device_updates[0].body.clone().unwrap()).unwrap();
    assert!(body.contains("deviceId="));
    assert!(body.contains("gameId=TESTGAME"));

    // Subsequent requests carry the refreshed cookie.
    let cookies: Vec<_> = device_updates[0].headers.get("Cookie").cloned().into_iter().collect();
    assert_eq!(cookies, vec!["connect.sid=fresh; Path=/".to_string()]);

    client.shutdown().await;
}

#[tokio::test]
async fn alternate_auth_provider_selects_the_endpoint() {
    let mock = Arc::new(MockHttpClient::new());
    let client = Client::new(mock.clone());
    let dir = tempfile::tempdir().unwrap();
    assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());

    client.login("sam", "secret", Some("icivics"), None);
    sleep(Duration::from_millis(300)).await;

    assert_eq!(mock.requests_to("/auth/login/icivics").len(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn game_session_lifecycle_binds_session_ids_at_flush_time() {
    let mock = Arc::new(MockHttpClient::new());
    mock.script(
        "/data/session/start",
        ScriptedResponse::ok(r#"{"gameSessionId":"sess-1"}"#),
    );

    let client = Client::new(mock.clone());
    let dir = tempfile::tempdir().unwrap();
    assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());
    client.set_version("2.1");
    client.set_game_level("tutorial");

    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .start_session(Some(Box::new(move |envelope| {
            let _ = tx.send(envelope);
        })))
        .await;
    let envelope = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert!(envelope.is_ok());
    assert_eq!(client.get_session_id(), "sess-1");

    client.add_telem_event_value("score", 1200u32);
    client.save_telem_event("Level_complete").await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .end_session(Some(Box::new(move |envelope| {
            let _ = tx.send(envelope);
        })))
        .await;
    let envelope = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert!(envelope.is_ok());
    assert_eq!(client.get_session_id(), "");

    sleep(Duration::from_millis(300)).await;
    let flushed = mock.requests_to("/api/v2/data/events");
    assert_eq!(flushed.len(), 1);
    let batch: serde_json::Value =
        serde_json::from_slice(flushed[0].body.as_deref().unwrap()).unwrap();
    let events = batch.as_array().unwrap();

    // Start bracket, the gameplay event, end bracket; every one stamped with
    // the session id that was active when the batch went out.
    let names: Vec<_> = events.iter().map(|e| e["eventName"].clone()).collect();
    assert_eq!(names, vec!["Game_start_session", "Level_complete", "Game_end_session"]);
    for event in events {
        assert_eq!(event["gameSessionId"], "sess-1");
        assert_eq!(event["clientVersion"], "2.1");
        assert_eq!(event["gameLevel"], "tutorial");
    }
    // Ordinals restarted at 1 for the new session.
    assert_eq!(events[0]["gameSessionEventOrder"], 1);
    assert_eq!(events[1]["gameSessionEventOrder"], 2);
    assert_eq!(events[2]["gameSessionEventOrder"], 3);

    // The end-session request itself names the session being closed.
    let end_requests = mock.requests_to("/data/session/end");
    assert_eq!(end_requests.len(), 1);
    let body = String::from_utf8(end_requests[0].body.clone().unwrap()).unwrap();
    assert!(body.contains("gameSessionId=sess-1"));

    client.shutdown().await;
}

#[tokio::test]
async fn cookie_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mock = Arc::new(MockHttpClient::new());
        mock.script(
            "/sdk/connect",
            ScriptedResponse::ok("").with_header("Set-Cookie", "connect.sid=sticky; Path=/"),
        );
        let client = Client::new(mock);
        assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());
        assert_eq!(client.get_cookie(false), "sticky");
        client.shutdown().await;
    }

    // A fresh process finds the cached cookie without re-authenticating.
    {
        let client = Client::new(Arc::new(MockHttpClient::new()));
        assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());
        assert_eq!(client.get_cookie(false), "sticky");
        client.shutdown().await;
    }
}

#[tokio::test]
async fn player_handles_scope_cookies_and_counters() {
    let mock = Arc::new(MockHttpClient::new());
    let client = Client::new(mock.clone());
    let dir = tempfile::tempdir().unwrap();
    assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());

    client.set_cookie("connect.sid=shared-device; Path=/");
    sleep(Duration::from_millis(300)).await; // let the worker persist it

    // A named player starts from a clean slate.
    client.set_player_handle("kirby").await;
    assert_eq!(client.get_cookie(true), "");
    client.set_cookie("connect.sid=kirbys; Path=/");
    sleep(Duration::from_millis(300)).await;

    // Switching back to the anonymous device restores its cookie.
    client.set_player_handle("").await;
    assert_eq!(client.get_cookie(false), "shared-device");

    // And the named player's cookie is still there too.
    client.set_player_handle("kirby").await;
    assert_eq!(client.get_cookie(false), "kirbys");

    // Dropping the handle's record forgets its cookie.
    client.set_player_handle("").await;
    client.remove_player_handle("kirby").await;
    client.set_player_handle("kirby").await;
    assert_eq!(client.get_cookie(true), "");

    client.shutdown().await;
}

#[tokio::test]
async fn user_info_is_cached_from_the_profile_endpoint() {
    let mock = Arc::new(MockHttpClient::new());
    mock.script(
        "/auth/user/profile",
        ScriptedResponse::ok(
            r#"{"username":"sam","firstName":"Sam","lastName":"B","email":"sam@example.org"}"#,
        ),
    );

    let client = Client::new(mock);
    let dir = tempfile::tempdir().unwrap();
    assert!(connect_and_wait(&client, dir.path(), "http://server.test").await.is_ok());

    let (tx, rx) = tokio::sync::oneshot::channel();
    client.get_user_info(Some(Box::new(move |envelope| {
        let _ = tx.send(envelope);
    })));
    assert!(timeout(Duration::from_secs(5), rx).await.unwrap().unwrap().is_ok());

    let info = client.user_info();
    assert_eq!(info.username, "sam");
    assert_eq!(info.first_name, "Sam");
    assert_eq!(info.last_initial, "B");
    assert_eq!(info.email, "sam@example.org");

    client.shutdown().await;
}
