use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use posts::memory::MemoryStore;
use serde_json::{Value, json};
use server::{app, config::Config, state::State};
use tower::ServiceExt;

fn router() -> Router {
    let store = Arc::new(MemoryStore::new());
    app(State::with_stores(Config::default(), store.clone(), store))
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);

    let request = match body {
        Some(body) => request
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, value)
}

async fn post_price(
    router: &Router,
    price: f64,
    lat: f64,
    lng: f64,
    product: &str,
    by: &str,
) -> u64 {
    let (status, body) = send(
        router,
        Method::POST,
        "/prices",
        Some(json!({
            "price": price,
            "address": "100 Centre St",
            "lat": lat,
            "lng": lng,
            "date": "2024-04-01",
            "product": product,
            "by": by,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_u64().unwrap()
}

async fn feedback(
    router: &Router,
    id: u64,
    email: &str,
    kind: &str,
    action: Value,
) -> (StatusCode, Value) {
    send(
        router,
        Method::PATCH,
        "/feedback",
        Some(json!({ "id": id, "feedbackType": kind, "email": email, "action": action })),
    )
    .await
}

fn ids(body: &Value) -> Vec<u64> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|post| post["id"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let router = router();
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_radius_search() {
    let router = router();
    let near = post_price(&router, 10.0, 51.05, -114.08, "Milk", "a@example.com").await;
    let far = post_price(&router, 5.0, 51.10, -114.20, "Milk", "a@example.com").await;

    let (status, body) = send(
        &router,
        Method::GET,
        "/prices?lat=51.05&lng=-114.08&radius=5&sortType=Price_LTH",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![near]);
    assert_eq!(body[0]["distanceKm"], 0.0);

    let (_, body) = send(&router, Method::GET, "/prices", None).await;
    assert_eq!(ids(&body), vec![far, near]);
}

#[tokio::test]
async fn test_partial_center_is_rejected() {
    let router = router();

    let (status, body) = send(&router, Method::GET, "/prices?lat=51.05", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MALFORMED_QUERY");
}

#[tokio::test]
async fn test_insert_validation() {
    let router = router();

    let (status, body) = send(
        &router,
        Method::POST,
        "/prices",
        Some(json!({
            "price": -1.0,
            "address": "x",
            "lat": 0.0,
            "lng": 0.0,
            "date": "2024-04-01",
            "product": "Milk",
            "by": "a@example.com",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_feedback_flow() {
    let router = router();
    let id = post_price(&router, 3.0, 51.05, -114.08, "Eggs", "a@example.com").await;

    let sign_in = json!({ "email": "b@example.com" });
    let (status, _) = send(&router, Method::POST, "/users", Some(sign_in)).await;
    assert_eq!(status, StatusCode::OK);

    // dislike, then switch to like
    let (status, body) = feedback(&router, id, "b@example.com", "Dislike", json!(1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "Disliked");

    let (status, body) = feedback(&router, id, "b@example.com", "Like", json!("Add")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "Liked");
    assert_eq!(body["likes"], 1);
    assert_eq!(body["dislikes"], 0);

    // liking again changes nothing
    let (_, body) = feedback(&router, id, "b@example.com", "Like", json!("Add")).await;
    assert_eq!(body["changed"], false);
    assert_eq!(body["likes"], 1);

    let (_, body) = send(&router, Method::GET, "/users/b@example.com/feedback", None).await;
    assert_eq!(body, json!({ "likes": [id], "dislikes": [] }));

    let (_, body) = send(&router, Method::GET, "/prices?email=b@example.com", None).await;
    assert_eq!(body[0]["isLiked"], true);
    assert_eq!(body[0]["isDisliked"], false);
    assert_eq!(body[0]["rating"], 1);
}

#[tokio::test]
async fn test_feedback_errors() {
    let router = router();
    let id = post_price(&router, 3.0, 51.05, -114.08, "Eggs", "a@example.com").await;

    let (status, body) = feedback(&router, id, "a@example.com", "Like", json!(-1)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "UNDERFLOW");

    let (status, body) = feedback(&router, id + 1, "a@example.com", "Like", json!(1)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "UNKNOWN_POST");

    let (status, body) = feedback(&router, id, "ghost@example.com", "Like", json!(1)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "UNKNOWN_USER");

    let (status, body) = feedback(&router, id, "a@example.com", "Love", json!(1)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FEEDBACK_TYPE");

    let (status, body) = feedback(&router, id, "a@example.com", "Like", json!(2)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ACTION");
}

#[tokio::test]
async fn test_user_posts() {
    let router = router();
    let mine = post_price(&router, 3.0, 51.05, -114.08, "Eggs", "a@example.com").await;
    let theirs = post_price(&router, 4.0, 51.05, -114.08, "Bread", "c@example.com").await;

    feedback(&router, theirs, "a@example.com", "Dislike", json!("Add")).await;

    let (status, body) = send(&router, Method::GET, "/users/a@example.com/posts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["posts"][0]["id"], mine);
    assert_eq!(body["dislikes"][0]["id"], theirs);
    assert_eq!(body["dislikes"][0]["dislikes"], 1);
    assert_eq!(body["likes"], json!([]));

    let (status, _) = send(&router, Method::GET, "/users/nobody@example.com", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_feedback_bodies() {
    let router = router();
    let id = post_price(&router, 3.0, 51.05, -114.08, "Eggs", "a@example.com").await;

    let (status, body) = feedback(&router, id, "a@example.com", "Like", json!(true)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ACTION");

    let (status, body) = send(
        &router,
        Method::PATCH,
        "/feedback",
        Some(json!({ "id": id, "email": "a@example.com", "action": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FEEDBACK_TYPE");

    let (status, body) = send(
        &router,
        Method::PATCH,
        "/feedback",
        Some(json!({ "feedbackType": "Like", "email": "a@example.com", "action": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MALFORMED_PAYLOAD");
}

#[tokio::test]
async fn test_malformed_json_bodies() {
    let router = router();

    let request = Request::builder()
        .method(Method::PATCH)
        .uri("/feedback")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "MALFORMED_PAYLOAD");

    let (status, body) = send(
        &router,
        Method::POST,
        "/prices",
        Some(json!({ "address": "x", "product": "Milk", "by": "a@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MALFORMED_PAYLOAD");

    let (status, body) = send(&router, Method::POST, "/users", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MALFORMED_PAYLOAD");
}

#[tokio::test]
async fn test_email_case_is_one_user() {
    let router = router();
    let id = post_price(&router, 3.0, 51.05, -114.08, "Eggs", "A@Example.com").await;

    let (status, body) = send(&router, Method::GET, "/users/a@example.com", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "a@example.com");
    assert_eq!(body["posts"], json!([id]));

    let (status, body) = send(&router, Method::GET, "/users/A@EXAMPLE.COM", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["posts"], json!([id]));

    let (status, _) = feedback(&router, id, "a@EXAMPLE.com", "Like", json!("Add")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&router, Method::GET, "/prices?email=A@example.com", None).await;
    assert_eq!(body[0]["by"], "a@example.com");
    assert_eq!(body[0]["isLiked"], true);
}
