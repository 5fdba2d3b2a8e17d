//! Ordering, cancellation and shutdown guarantees of the request dispatcher.

use glasslab_sdk::Client;
use glasslab_sdk::test_utils::{MockHttpClient, ScriptedResponse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn connected_client(mock: Arc<MockHttpClient>, dir: &std::path::Path) -> Arc<Client> {
    let _ = env_logger::builder().is_test(true).try_init();
    let client = Client::new(mock);
    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .connect(
            dir,
            "TESTGAME",
            "http://server.test",
            Some(Box::new(move |envelope| {
                let _ = tx.send(envelope);
            })),
        )
        .await;
    let envelope = timeout(Duration::from_secs(5), rx)
        .await
        .expect("connect should complete")
        .unwrap();
    assert!(envelope.is_ok(), "connect failed: {}", envelope.payload);
    client
}

#[tokio::test]
async fn same_category_completions_arrive_in_submission_order() {
    let mock = Arc::new(MockHttpClient::new());
    // The first login takes far longer than the second; completions must
    // still pair up in submission order.
    mock.script(
        "/auth/login",
        ScriptedResponse::ok(r#"{"id":1}"#).with_delay(Duration::from_millis(300)),
    );
    mock.script("/auth/login", ScriptedResponse::ok(r#"{"id":2}"#));

    let dir = tempfile::tempdir().unwrap();
    let client = connected_client(mock, dir.path()).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let order = order.clone();
        client.login(
            name,
            "secret",
            None,
            Some(Box::new(move |envelope| {
                order.lock().unwrap().push((name, envelope.payload));
            })),
        );
    }

    sleep(Duration::from_millis(900)).await;

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 2);
    assert_eq!(order[0].0, "first");
    assert!(order[0].1.contains(r#""id":1"#));
    assert_eq!(order[1].0, "second");
    assert!(order[1].1.contains(r#""id":2"#));

    client.shutdown().await;
}

#[tokio::test]
async fn categories_do_not_serialize_each_other() {
    let mock = Arc::new(MockHttpClient::new());
    mock.script(
        "/lms/courses",
        ScriptedResponse::ok(r#"{"courses":[]}"#).with_delay(Duration::from_millis(400)),
    );

    let dir = tempfile::tempdir().unwrap();
    let client = connected_client(mock, dir.path()).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    {
        let order = order.clone();
        client.get_courses(Some(Box::new(move |_| {
            order.lock().unwrap().push("courses");
        })));
    }
    {
        let order = order.clone();
        client.auth_status(Some(Box::new(move |_| {
            order.lock().unwrap().push("status");
        })));
    }

    sleep(Duration::from_millis(900)).await;

    // The slow GetCourses call must not hold up the AuthStatus completion.
    assert_eq!(*order.lock().unwrap(), vec!["status", "courses"]);

    client.shutdown().await;
}

#[tokio::test]
async fn cancelled_request_never_fires_and_pairing_stays_aligned() {
    let mock = Arc::new(MockHttpClient::new());
    mock.script(
        "/auth/login",
        ScriptedResponse::ok(r#"{"id":7}"#).with_delay(Duration::from_millis(200)),
    );
    mock.script("/auth/login", ScriptedResponse::ok(r#"{"id":8}"#));

    let dir = tempfile::tempdir().unwrap();
    let client = connected_client(mock, dir.path()).await;

    let first_fired = Arc::new(AtomicBool::new(false));
    {
        let first_fired = first_fired.clone();
        client.login(
            "doomed",
            "secret",
            None,
            Some(Box::new(move |_| {
                first_fired.store(true, Ordering::SeqCst);
            })),
        );
    }
    let second_payload = Arc::new(Mutex::new(String::new()));
    {
        let second_payload = second_payload.clone();
        client.login(
            "kept",
            "secret",
            None,
            Some(Box::new(move |envelope| {
                *second_payload.lock().unwrap() = envelope.payload;
            })),
        );
    }

    // Cancel while the first response is still in flight.
    client.cancel_request("login");

    sleep(Duration::from_millis(900)).await;

    assert!(
        !first_fired.load(Ordering::SeqCst),
        "cancelled handler must never be invoked"
    );
    // The cancelled slot consumed the first response; the second request
    // still received the second response.
    assert!(second_payload.lock().unwrap().contains(r#""id":8"#));

    client.shutdown().await;
}

#[tokio::test]
async fn cancel_with_unknown_key_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let client = connected_client(Arc::new(MockHttpClient::new()), dir.path()).await;
    client.cancel_request("definitely_not_a_category");
    client.cancel_request("logout");
    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_handlers_and_new_network_activity() {
    let mock = Arc::new(MockHttpClient::new());
    mock.script(
        "/lms/courses",
        ScriptedResponse::ok("{}").with_delay(Duration::from_millis(300)),
    );

    let dir = tempfile::tempdir().unwrap();
    let client = connected_client(mock.clone(), dir.path()).await;

    let fired = Arc::new(AtomicBool::new(false));
    {
        let fired = fired.clone();
        client.get_courses(Some(Box::new(move |_| {
            fired.store(true, Ordering::SeqCst);
        })));
    }

    client.shutdown().await;
    // Second shutdown is a no-op.
    client.shutdown().await;

    let late = Arc::new(AtomicBool::new(false));
    {
        let late = late.clone();
        client.auth_status(Some(Box::new(move |_| {
            late.store(true, Ordering::SeqCst);
        })));
    }

    sleep(Duration::from_millis(800)).await;

    assert!(
        !fired.load(Ordering::SeqCst),
        "pending handler fired after shutdown"
    );
    assert!(!late.load(Ordering::SeqCst));
    assert!(
        mock.requests_to("/auth/login/status").is_empty(),
        "request issued after shutdown reached the network"
    );
}

#[tokio::test]
async fn connect_failure_is_delivered_asynchronously() {
    use glasslab_sdk::test_utils::FailingMockHttpClient;

    let client = Client::new(Arc::new(FailingMockHttpClient));
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .connect(
            dir.path(),
            "TESTGAME",
            "http://unreachable.test",
            Some(Box::new(move |envelope| {
                let _ = tx.send(envelope);
            })),
        )
        .await;

    let envelope = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert!(!envelope.is_ok());
    assert!(envelope.payload.contains("error"));
    assert!(!client.is_connected());

    client.shutdown().await;
}
