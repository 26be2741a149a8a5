//! Local stand-in for the cloud identity endpoints used by `eventlink-auth`.
//!
//! * `GET /computeMetadata/v1/instance/service-accounts/default/{email,token}`
//!   behaves like a compute metadata server (point `GCE_METADATA_HOST` here).
//! * `POST /token` exchanges a JWT-bearer assertion signed with the mock's
//!   key (point a service-account key's `token_uri` here).
//!
//! With `MOCK_SA_KEY_PATH` set, a matching service-account key file is
//! written on startup so `GOOGLE_APPLICATION_CREDENTIALS` can use it.

use std::sync::Arc;

use axum::{
    extract::{Form, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 8089;
const SERVICE_ACCOUNT_EMAIL: &str = "mock-publisher@mock-project.iam.gserviceaccount.com";
const KEY_ID: &str = "mock-key-1";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Signing material and identity served by the mock.
struct MockState {
    private_pem: String,
    decoding_key: DecodingKey,
    token_uri: String,
}

impl MockState {
    fn generate(token_uri: String) -> anyhow::Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private.to_pkcs8_pem(LineEnding::LF)?.to_string();
        let public_pem = public.to_public_key_pem(LineEnding::LF)?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())?;

        Ok(Self {
            private_pem,
            decoding_key,
            token_uri,
        })
    }

    /// Service-account key file contents matching this mock.
    fn service_account_key(&self) -> Value {
        json!({
            "type": "service_account",
            "project_id": "mock-project",
            "private_key_id": KEY_ID,
            "private_key": self.private_pem,
            "client_email": SERVICE_ACCOUNT_EMAIL,
            "token_uri": self.token_uri,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("MOCK_METADATA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    info!("generating RSA-2048 key");
    let state = MockState::generate(format!("http://127.0.0.1:{port}/token"))?;

    if let Ok(path) = std::env::var("MOCK_SA_KEY_PATH") {
        std::fs::write(&path, serde_json::to_string_pretty(&state.service_account_key())?)?;
        info!(path = %path, "wrote service account key file");
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "mock metadata server listening");
    axum::serve(listener, router(Arc::new(state))).await?;
    Ok(())
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route(
            "/computeMetadata/v1/instance/service-accounts/default/email",
            get(metadata_email),
        )
        .route(
            "/computeMetadata/v1/instance/service-accounts/default/token",
            get(metadata_token),
        )
        .route("/token", post(exchange_assertion))
        .with_state(state)
}

// --- Metadata server ---

fn has_metadata_flavor(headers: &HeaderMap) -> bool {
    headers
        .get("Metadata-Flavor")
        .is_some_and(|v| v.as_bytes() == b"Google")
}

fn missing_flavor() -> Response {
    warn!("metadata request without Metadata-Flavor header");
    (StatusCode::FORBIDDEN, "Missing Metadata-Flavor:Google header.").into_response()
}

fn access_token_response(principal: &str) -> Json<Value> {
    let access_token = format!("mock-{}", uuid::Uuid::new_v4().simple());
    info!(principal, expires_in = TOKEN_LIFETIME_SECS, "issued access token");
    Json(json!({
        "access_token": access_token,
        "expires_in": TOKEN_LIFETIME_SECS,
        "token_type": "Bearer",
    }))
}

async fn metadata_email(headers: HeaderMap) -> Response {
    if !has_metadata_flavor(&headers) {
        return missing_flavor();
    }
    SERVICE_ACCOUNT_EMAIL.into_response()
}

async fn metadata_token(headers: HeaderMap) -> Response {
    if !has_metadata_flavor(&headers) {
        return missing_flavor();
    }
    access_token_response(SERVICE_ACCOUNT_EMAIL).into_response()
}

// --- OAuth token endpoint ---

#[derive(Deserialize)]
struct TokenRequest {
    grant_type: String,
    assertion: String,
}

#[derive(Deserialize)]
struct AssertionClaims {
    iss: String,
}

fn oauth_error(status: StatusCode, error: &str, description: String) -> Response {
    warn!(error, %description, "token request rejected");
    (
        status,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

async fn exchange_assertion(
    State(state): State<Arc<MockState>>,
    Form(req): Form<TokenRequest>,
) -> Response {
    if req.grant_type != JWT_BEARER_GRANT {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            format!("grant type {} is not supported", req.grant_type),
        );
    }

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[&state.token_uri]);
    match jsonwebtoken::decode::<AssertionClaims>(&req.assertion, &state.decoding_key, &validation) {
        Ok(data) => access_token_response(&data.claims.iss).into_response(),
        Err(e) => oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", e.to_string()),
    }
}
