use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use freight_desk::config::BackendConfig;
use freight_desk::infra::SupabaseClient;
use freight_desk::workflows::roles::domain::{ModerationStatus, Role, RoleRequestId};
use freight_desk::workflows::roles::repository::{
    AuthError, AuthService, BlobStorage, RepositoryError, RoleRepository,
};
use serde_json::{json, Value};
use url::Url;

const ANON_KEY: &str = "anon-test-key";
const ACCESS_TOKEN: &str = "access-token-1";

/// What the fake backend saw, keyed by route.
#[derive(Default)]
struct Recorded {
    profile_queries: Vec<HashMap<String, String>>,
    bearer_tokens: Vec<String>,
    uploads: Vec<(String, String, String, usize)>,
}

type Shared = Arc<Mutex<Recorded>>;

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn token(
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if params.get("grant_type").map(String::as_str) != Some("password") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "msg": "unsupported grant" })));
    }
    if body["password"] != json!("road-ready-1") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "access_token": ACCESS_TOKEN,
            "refresh_token": "refresh-1",
            "expires_at": 1_714_554_000,
            "user": {
                "id": "u-moderator",
                "email": body["email"],
                "user_metadata": { "full_name": "Mo Derator" }
            }
        })),
    )
}

async fn profiles(
    State(recorded): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    {
        let mut recorded = recorded.lock().unwrap();
        recorded.bearer_tokens.push(bearer(&headers));
        recorded.profile_queries.push(params);
    }
    Json(json!([{
        "id": "p-1",
        "request_id": "r-1",
        "user_id": "u-1",
        "role": "carrier",
        "full_name": "Dana Hauler",
        "company_name": "Hauler Logistics LLC",
        "phone": "+12025550100",
        "truck_type": "Dry Van",
        "mc_number": "MC-482910",
        "status": "pending",
        "email": "dana@haulers.example",
        "documents_url": null,
        "created_at": "2024-05-01T08:00:00Z"
    }]))
}

async fn update_request() -> Json<Value> {
    // PostgREST answers an update that matched nothing with an empty array.
    Json(json!([]))
}

async fn upload(
    State(recorded): State<Shared>,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if bucket == "broker-documents" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Bucket not found" })),
        );
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    recorded
        .lock()
        .unwrap()
        .uploads
        .push((bucket.clone(), path.clone(), content_type, body.len()));
    (
        StatusCode::OK,
        Json(json!({ "Key": format!("{bucket}/{path}") })),
    )
}

async fn spawn_backend() -> (SupabaseClient, Shared) {
    let recorded = Shared::default();
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/rest/v1/role_profiles_with_email", get(profiles))
        .route("/rest/v1/role_requests", patch(update_request))
        .route("/storage/v1/object/:bucket/*path", post(upload))
        .with_state(Arc::clone(&recorded));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake backend");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake backend");
    });

    let config = BackendConfig {
        url: Url::parse(&format!("http://{addr}/")).expect("url"),
        anon_key: ANON_KEY.to_string(),
    };
    (SupabaseClient::new(&config).expect("client"), recorded)
}

#[tokio::test]
async fn password_grant_opens_a_session() {
    let (client, _) = spawn_backend().await;
    let mut changes = client.subscribe();

    let session = client
        .sign_in("moderator@freight.example", "road-ready-1")
        .await
        .expect("signed in");

    assert_eq!(session.access_token, ACCESS_TOKEN);
    assert_eq!(session.user.full_name(), Some("Mo Derator"));
    assert!(session.expires_at.is_some());
    assert_eq!(
        client.current_session().await.expect("session").map(|s| s.user.id),
        Some(session.user.id.clone())
    );
    let change = changes.recv().await.expect("auth change");
    assert_eq!(change.session, Some(session));
}

#[tokio::test]
async fn invalid_grant_is_translated() {
    let (client, _) = spawn_backend().await;

    let error = client
        .sign_in("moderator@freight.example", "wrong-password")
        .await
        .expect_err("rejected");

    assert!(matches!(error, AuthError::Rejected { .. }));
    assert_eq!(error.user_message(), "Invalid e-mail or password");
    assert!(client.current_session().await.expect("session").is_none());
}

#[tokio::test]
async fn combined_view_is_filtered_by_role_with_the_user_token() {
    let (client, recorded) = spawn_backend().await;

    let anonymous = client
        .profiles_for_role(Role::Carrier)
        .await
        .expect("profiles");
    assert_eq!(anonymous.len(), 1);
    assert_eq!(anonymous[0].email.as_deref(), Some("dana@haulers.example"));
    assert_eq!(anonymous[0].profile.status, ModerationStatus::Pending);
    assert_eq!(
        anonymous[0].profile.contact.company_name.as_deref(),
        Some("Hauler Logistics LLC")
    );

    client
        .sign_in("moderator@freight.example", "road-ready-1")
        .await
        .expect("signed in");
    client
        .profiles_for_role(Role::Carrier)
        .await
        .expect("profiles");

    let recorded = recorded.lock().unwrap();
    let query = &recorded.profile_queries[0];
    assert_eq!(query.get("role").map(String::as_str), Some("eq.carrier"));
    assert_eq!(query.get("order").map(String::as_str), Some("created_at.desc"));
    assert_eq!(
        recorded.bearer_tokens,
        vec![
            format!("Bearer {ANON_KEY}"),
            format!("Bearer {ACCESS_TOKEN}")
        ]
    );
}

#[tokio::test]
async fn update_matching_no_row_is_not_found() {
    let (client, _) = spawn_backend().await;

    let error = client
        .update_request_status(&RoleRequestId("r-missing".to_string()), ModerationStatus::Approved)
        .await
        .expect_err("nothing updated");

    assert_eq!(error, RepositoryError::NotFound);
}

#[tokio::test]
async fn uploads_carry_the_content_type() {
    let (client, recorded) = spawn_backend().await;

    client
        .upload(
            "carrier-documents",
            "carrier_dana_1714550400000.pdf",
            b"%PDF-1.7".to_vec(),
            "application/pdf",
        )
        .await
        .expect("stored");
    let error = client
        .upload("broker-documents", "broker_x_1.png", vec![1], "image/png")
        .await
        .expect_err("unknown bucket");

    assert_eq!(error.to_string(), "storage rejected the request: Bucket not found");
    let recorded = recorded.lock().unwrap();
    assert_eq!(
        recorded.uploads,
        vec![(
            "carrier-documents".to_string(),
            "carrier_dana_1714550400000.pdf".to_string(),
            "application/pdf".to_string(),
            8
        )]
    );
}

#[tokio::test]
async fn public_urls_point_at_the_public_object_route() {
    let (client, _) = spawn_backend().await;
    let url = client.public_url("carrier-documents", "carrier_dana_1.png");
    assert!(url.starts_with("http://127.0.0.1:"));
    assert!(url.ends_with("/storage/v1/object/public/carrier-documents/carrier_dana_1.png"));
}
