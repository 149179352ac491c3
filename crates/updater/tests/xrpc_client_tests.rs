use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use avatar_core::{ProfileRecord, UpdateError};
use avatar_updater::client::{ProfileApi, ProfileClient, Session};
use avatar_updater::health::{Health, HealthCheck, HttpHealthChecker};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Url;
use serde_json::{json, Value};

type Posted = Arc<Mutex<Vec<Value>>>;

async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

fn xrpc_error(status: StatusCode, name: &str, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": name, "message": message })))
}

async fn create_session(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] != "app-password" {
        return xrpc_error(
            StatusCode::UNAUTHORIZED,
            "AuthenticationRequired",
            "Invalid identifier or password",
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "accessJwt": "jwt-1",
            "refreshJwt": "refresh-1",
            "handle": body["identifier"],
            "did": "did:plc:me",
        })),
    )
}

async fn get_record(
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer jwt-1") {
        return xrpc_error(StatusCode::UNAUTHORIZED, "AuthMissing", "no token");
    }
    if q.get("collection").map(String::as_str) != Some("app.bsky.actor.profile")
        || q.get("rkey").map(String::as_str) != Some("self")
    {
        return xrpc_error(StatusCode::BAD_REQUEST, "InvalidRequest", "wrong record");
    }
    match q.get("repo").map(String::as_str) {
        Some("did:plc:me") => (
            StatusCode::OK,
            Json(json!({
                "uri": "at://did:plc:me/app.bsky.actor.profile/self",
                "cid": "bafyrev1",
                "value": { "$type": "app.bsky.actor.profile", "displayName": "X" },
            })),
        ),
        _ => xrpc_error(
            StatusCode::BAD_REQUEST,
            "RecordNotFound",
            "Could not locate record",
        ),
    }
}

async fn put_record(State(posted): State<Posted>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    posted.lock().unwrap().push(body.clone());
    if body["swapRecord"] != "bafyrev1" {
        return xrpc_error(
            StatusCode::BAD_REQUEST,
            "InvalidSwap",
            "Record was at bafyrev9",
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "uri": "at://did:plc:me/app.bsky.actor.profile/self",
            "cid": "bafyrev2",
        })),
    )
}

async fn fake_pds() -> (Url, Posted) {
    let posted = Posted::default();
    let router = Router::new()
        .route(
            "/xrpc/_health",
            get(|| async { Json(json!({ "version": "0.4.0" })) }),
        )
        .route("/xrpc/com.atproto.server.createSession", post(create_session))
        .route("/xrpc/com.atproto.repo.getRecord", get(get_record))
        .route("/xrpc/com.atproto.repo.putRecord", post(put_record))
        .with_state(posted.clone());
    (serve(router).await, posted)
}

fn client(url: &Url) -> ProfileClient {
    ProfileClient::new(url.clone(), Duration::from_secs(5)).unwrap()
}

fn session() -> Session {
    Session::new("did:plc:me", "me.example", "jwt-1")
}

#[tokio::test]
async fn health_reports_version() {
    let (url, _) = fake_pds().await;
    let health = HttpHealthChecker::new(url, Duration::from_secs(2)).check().await;
    assert_eq!(
        health,
        Health::Healthy {
            version: Some("0.4.0".into())
        }
    );
}

#[tokio::test]
async fn health_server_error_is_unhealthy() {
    let router = Router::new().route(
        "/xrpc/_health",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let url = serve(router).await;
    let health = HttpHealthChecker::new(url, Duration::from_secs(2)).check().await;
    assert!(matches!(health, Health::Unhealthy(_)), "{health:?}");
}

#[tokio::test]
async fn health_unreachable_is_unhealthy() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = Url::parse(&format!("http://{addr}")).unwrap();
    let health = HttpHealthChecker::new(url, Duration::from_secs(2)).check().await;
    assert!(matches!(health, Health::Unhealthy(_)), "{health:?}");
}

#[tokio::test]
async fn authenticate_returns_session() {
    let (url, _) = fake_pds().await;
    let s = client(&url)
        .authenticate("me.example", "app-password")
        .await
        .unwrap();
    assert_eq!(s.did, "did:plc:me");
    assert_eq!(s.handle, "me.example");
}

#[tokio::test]
async fn bad_password_is_auth_error() {
    let (url, _) = fake_pds().await;
    let err = client(&url)
        .authenticate("me.example", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Auth(_)), "{err:?}");
}

#[tokio::test]
async fn fetch_returns_record_and_revision() {
    let (url, _) = fake_pds().await;
    let record = client(&url)
        .fetch_record("did:plc:me", &session())
        .await
        .unwrap();
    assert_eq!(record.revision.as_deref(), Some("bafyrev1"));
    assert_eq!(record.value["displayName"], "X");
}

#[tokio::test]
async fn fetch_unknown_repo_is_not_found() {
    let (url, _) = fake_pds().await;
    let err = client(&url)
        .fetch_record("did:plc:nobody", &session())
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn replace_sends_discriminator_and_swap() {
    let (url, posted) = fake_pds().await;
    let mut value = serde_json::Map::new();
    value.insert("displayName".into(), json!("X"));
    let record = ProfileRecord::new(value, Some("bafyrev1".into()));

    let ack = client(&url)
        .replace_record("did:plc:me", &session(), &record)
        .await
        .unwrap();
    assert_eq!(ack.cid, "bafyrev2");

    let body = posted.lock().unwrap()[0].clone();
    assert_eq!(body["repo"], "did:plc:me");
    assert_eq!(body["collection"], "app.bsky.actor.profile");
    assert_eq!(body["rkey"], "self");
    assert_eq!(body["record"]["$type"], "app.bsky.actor.profile");
    assert_eq!(body["record"]["displayName"], "X");
}

#[tokio::test]
async fn stale_revision_is_conflict() {
    let (url, _) = fake_pds().await;
    let record = ProfileRecord::new(serde_json::Map::new(), Some("bafyrev0".into()));
    let err = client(&url)
        .replace_record("did:plc:me", &session(), &record)
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Conflict(_)), "{err:?}");
}
