//! Twitter adapter against an in-process fake v2 API.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use polybot::config::{Config, TwitterConfig};
use polybot::prompt::Scripted;
use polybot::service::{ServiceKind, Twitter};
use polybot::{Image, PostError, PostRef, Service, Status};
use serde_json::{Value, json};

#[derive(Default)]
struct Api {
    rate_limited: bool,
    authorizations: Vec<String>,
    uploads: Vec<String>,
    metadata: Vec<Value>,
    tweets: Vec<Value>,
}

type Shared = Arc<Mutex<Api>>;

/// Accept only OAuth 1.0a headers for the test consumer; record them.
fn signed(api: &Shared, headers: &HeaderMap) -> bool {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let ok = auth.starts_with("OAuth ")
        && auth.contains(r#"oauth_consumer_key="ck""#)
        && auth.contains(r#"oauth_token="at""#)
        && auth.contains(r#"oauth_signature_method="HMAC-SHA1""#)
        && auth.contains("oauth_signature=");
    api.lock().unwrap().authorizations.push(auth);
    ok
}

async fn me(State(api): State<Shared>, headers: HeaderMap) -> Response {
    if !signed(&api, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "data": { "id": "42", "name": "Bot", "username": "polybot" } })).into_response()
}

async fn upload(State(api): State<Shared>, headers: HeaderMap, mut form: Multipart) -> Response {
    if !signed(&api, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut category = String::new();
    while let Some(field) = form.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "media_category" => category = field.text().await.unwrap(),
            _ => {
                field.bytes().await.unwrap();
            }
        }
    }
    let mut api = api.lock().unwrap();
    api.uploads.push(category);
    let id = format!("9{}", api.uploads.len());
    Json(json!({ "data": { "id": id, "media_key": format!("3_{id}") } })).into_response()
}

async fn metadata(State(api): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !signed(&api, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    api.lock().unwrap().metadata.push(body);
    Json(json!({ "data": { "associated_metadata": true } })).into_response()
}

async fn tweet(State(api): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !signed(&api, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut api = api.lock().unwrap();
    if api.rate_limited {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("x-rate-limit-reset", "1893456000")],
            Json(json!({ "title": "Too Many Requests" })),
        )
            .into_response();
    }
    api.tweets.push(body);
    let id = (1000 + api.tweets.len()).to_string();
    Json(json!({ "data": { "id": id, "text": "" } })).into_response()
}

async fn start_api(api: Shared) -> SocketAddr {
    let app = Router::new()
        .route("/2/users/me", get(me))
        .route("/2/media/upload", post(upload))
        .route("/2/media/metadata", post(metadata))
        .route("/2/tweets", post(tweet))
        .with_state(api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr, consumer_key: &str) -> TwitterConfig {
    TwitterConfig {
        consumer_key: consumer_key.into(),
        consumer_secret: "cs".into(),
        access_token: "at".into(),
        access_token_secret: "ats".into(),
        api_base: Some(format!("http://{addr}")),
    }
}

async fn connected(api: &Shared) -> Twitter {
    let addr = start_api(api.clone()).await;
    let mut twitter = Twitter::new(config(addr, "ck"), true, reqwest::Client::new());
    twitter.auth().await.unwrap();
    twitter
}

fn png() -> Image {
    let mut buf = Vec::new();
    image::DynamicImage::new_rgb8(16, 16)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    Image::from_bytes(buf, "image/png")
}

#[tokio::test]
async fn auth_reports_username() {
    let api = Shared::default();
    let twitter = connected(&api).await;
    assert_eq!(twitter.username(), Some("polybot"));
}

#[tokio::test]
async fn wrong_consumer_fails_auth() {
    let api = Shared::default();
    let addr = start_api(api).await;
    let mut twitter = Twitter::new(config(addr, "other"), true, reqwest::Client::new());
    let err = twitter.auth().await.unwrap_err();
    assert!(format!("{err:#}").contains("401"), "{err:#}");
}

#[tokio::test]
async fn tweets_with_media_and_alt_text() {
    let api = Shared::default();
    let mut twitter = connected(&api).await;

    let images = [png().with_description("grey square"), png()];
    let out = twitter
        .post(&Status::from("hello"), false, &images, None)
        .await
        .unwrap();
    assert_eq!(out, Some(PostRef::Id { id: "1001".into() }));

    let api = api.lock().unwrap();
    assert_eq!(api.uploads, vec!["tweet_image", "tweet_image"]);
    assert_eq!(api.metadata.len(), 1);
    assert_eq!(api.metadata[0]["id"], "91");
    assert_eq!(api.metadata[0]["metadata"]["alt_text"]["text"], "grey square");
    assert_eq!(api.tweets[0]["text"], "hello");
    assert_eq!(api.tweets[0]["media"]["media_ids"], json!(["91", "92"]));
    assert!(api.tweets[0].get("reply").is_none());

    // Each request carries a fresh nonce.
    let nonces: std::collections::HashSet<_> = api
        .authorizations
        .iter()
        .filter_map(|a| a.split(", ").find(|p| p.contains("oauth_nonce=")))
        .collect();
    assert_eq!(nonces.len(), api.authorizations.len());
}

#[tokio::test]
async fn long_status_becomes_reply_chain() {
    let api = Shared::default();
    let mut twitter = connected(&api).await;

    let text = "tweet ".repeat(100);
    let last = twitter
        .post(&Status::from(text.as_str()), true, &[], None)
        .await
        .unwrap();
    assert_eq!(last, Some(PostRef::Id { id: "1003".into() }));

    let api = api.lock().unwrap();
    assert_eq!(api.tweets.len(), 3);
    for t in &api.tweets {
        assert!(t["text"].as_str().unwrap().chars().count() <= 280);
    }
    assert_eq!(api.tweets[1]["reply"]["in_reply_to_tweet_id"], "1001");
    assert_eq!(api.tweets[2]["reply"]["in_reply_to_tweet_id"], "1002");
}

#[tokio::test]
async fn rate_limit_carries_reset_time() {
    let api = Shared::default();
    let mut twitter = connected(&api).await;
    api.lock().unwrap().rate_limited = true;

    match twitter.do_post("again", &[], None).await.unwrap_err() {
        PostError::RateLimited { reset } => {
            assert_eq!(reset.unwrap().timestamp(), 1_893_456_000);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn setup_with_missing_credentials_is_declined() {
    let mut config = Config::default();
    let mut prompt = Scripted::new(["key", "secret", "", "token-secret"]);
    let ok = ServiceKind::Twitter
        .setup(&mut config, &mut prompt, &reqwest::Client::new())
        .await
        .unwrap();
    assert!(!ok);
    assert!(config.twitter.is_none());
    assert!(prompt.transcript.iter().any(|l| l == "Access token: "));
}
