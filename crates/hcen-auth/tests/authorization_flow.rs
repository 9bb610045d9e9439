//! End-to-end authorization flows against a mock identity provider.

use std::sync::Arc;
use std::time::Duration;

use hcen_auth::audit::{AuditEventKind, MemoryAuditSink};
use hcen_auth::crypto::pkce::{generate_code_challenge, generate_code_verifier};
use hcen_auth::exchange::CallbackRequest;
use hcen_auth::identity::{InMemoryIdentityDirectory, UserIdentity};
use hcen_auth::store::keys;
use hcen_auth::{AuthBroker, AuthError, BrokerConfig, KeyValueStore, OAuthErrorKind, StoreHandles};
use hcen_auth::state::ClientType;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;
use time::OffsetDateTime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const REDIRECT: &str = "https://app/cb";

struct Harness {
    server: MockServer,
    broker: AuthBroker,
    stores: StoreHandles,
    audit: Arc<MemoryAuditSink>,
}

fn config(idp: &str) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.idp.issuer = idp.to_string();
    config.idp.authorization_endpoint = format!("{idp}/oidc/v1/authorize");
    config.idp.token_endpoint = format!("{idp}/oidc/v1/token");
    config.idp.client_id = "hcen".to_string();
    config.idp.client_secret = Some(CLIENT_SECRET.to_string());
    config.idp.request_timeout = Duration::from_secs(2);
    config.session.jwt_secret = "an-hs256-secret-of-at-least-32-bytes".to_string();
    config
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let stores = StoreHandles::in_memory();
    let audit = Arc::new(MemoryAuditSink::new());
    let directory = InMemoryIdentityDirectory::new();
    directory.insert(
        UserIdentity::new("12345678")
            .with_display_name("Ana Pérez")
            .with_role("PATIENT"),
    );

    let broker = AuthBroker::new(
        config(&server.uri()),
        stores.clone(),
        Arc::new(directory),
        audit.clone(),
    )
    .unwrap();

    Harness {
        server,
        broker,
        stores,
        audit,
    }
}

const CLIENT_SECRET: &str = "secret";

/// HS256 ID token keyed by the client secret, valid for an hour.
fn id_token(mut claims: serde_json::Value) -> String {
    claims["exp"] = json!(OffsetDateTime::now_utc().unix_timestamp() + 3600);
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(CLIENT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Token endpoint that echoes the nonce from the pending authorization.
async fn mount_idp(h: &Harness, nonce: String, expected_calls: u64) {
    let issuer = h.server.uri();
    Mock::given(method("POST"))
        .and(path("/oidc/v1/token"))
        .respond_with(move |_: &Request| {
            ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "expires_in": 300,
                "id_token": id_token(json!({
                    "iss": issuer,
                    "sub": "uid-1",
                    "aud": "hcen",
                    "nonce": nonce,
                    "numero_documento": "12345678"
                }))
            }))
        })
        .expect(expected_calls)
        .mount(&h.server)
        .await;
}

fn nonce_of(url: &url::Url) -> String {
    url.query_pairs()
        .find(|(k, _)| k == "nonce")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn web_login_then_replay_fails() {
    let h = harness().await;

    let request = h
        .broker
        .begin_authorization(ClientType::Web, REDIRECT, None)
        .await
        .unwrap();
    mount_idp(&h, nonce_of(&request.authorization_url), 1).await;

    let login = h
        .broker
        .complete_authorization(CallbackRequest::web("abc", &request.state, REDIRECT))
        .await
        .unwrap();

    let session = &login.grant.session;
    assert_eq!(session.subject_id, "12345678");
    assert_eq!(session.client_type, ClientType::Web);
    let ttl = (session.expires_at - session.issued_at).whole_seconds();
    assert!((3595..=3600).contains(&ttl), "ttl {ttl}");
    assert_eq!(session.attributes["roles"], "PATIENT");
    assert_eq!(session.attributes["registered"], "true");
    assert_eq!(login.redirect_uri, REDIRECT);

    let loaded = h.broker.authenticate(&login.grant.token).await.unwrap();
    assert_eq!(&loaded, session);

    let err = h
        .broker
        .complete_authorization(CallbackRequest::web("abc", &request.state, REDIRECT))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidState { .. }));

    assert_eq!(
        h.audit.kinds().await,
        vec![
            AuditEventKind::AuthorizationIssued,
            AuditEventKind::StateConsumed,
            AuditEventKind::ExchangeSucceeded,
            AuditEventKind::SessionCreated,
            AuditEventKind::StateRejected,
        ]
    );
}

#[tokio::test]
async fn mobile_pkce_mismatch_fails_before_idp() {
    let h = harness().await;
    mount_idp(&h, String::new(), 0).await;

    let verifier = generate_code_verifier();
    let challenge = generate_code_challenge(&verifier);
    let request = h
        .broker
        .begin_authorization(ClientType::Mobile, REDIRECT, Some(&challenge))
        .await
        .unwrap();

    let wrong = generate_code_verifier();
    assert_ne!(wrong, verifier);

    let err = h
        .broker
        .complete_authorization(CallbackRequest::mobile(
            "abc",
            &request.state,
            REDIRECT,
            Some(wrong),
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::OAuth {
            kind: OAuthErrorKind::Pkce,
            ..
        }
    ));
    assert_eq!(err.code(), "pkce_verification_failed");

    let events = h.audit.events().await;
    let failed = events
        .iter()
        .find(|e| e.kind == AuditEventKind::ExchangeFailed)
        .unwrap();
    assert_eq!(failed.details["step"], "pkce_verification");
}

#[tokio::test]
async fn mobile_login_succeeds_with_matching_verifier() {
    let h = harness().await;

    let verifier = generate_code_verifier();
    let challenge = generate_code_challenge(&verifier);
    let request = h
        .broker
        .begin_authorization(ClientType::Mobile, REDIRECT, Some(&challenge))
        .await
        .unwrap();
    mount_idp(&h, nonce_of(&request.authorization_url), 1).await;

    let login = h
        .broker
        .complete_authorization(CallbackRequest::mobile(
            "abc",
            &request.state,
            REDIRECT,
            Some(verifier),
        ))
        .await
        .unwrap();
    assert_eq!(login.grant.session.client_type, ClientType::Mobile);
}

#[tokio::test]
async fn mobile_missing_verifier_makes_no_network_call() {
    let h = harness().await;
    mount_idp(&h, String::new(), 0).await;

    let challenge = generate_code_challenge(&generate_code_verifier());
    let request = h
        .broker
        .begin_authorization(ClientType::Mobile, REDIRECT, Some(&challenge))
        .await
        .unwrap();

    let err = h
        .broker
        .complete_authorization(CallbackRequest::mobile("abc", &request.state, REDIRECT, None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::OAuth {
            kind: OAuthErrorKind::LocalValidation,
            ..
        }
    ));
}

#[tokio::test]
async fn concurrent_callbacks_create_one_session() {
    let h = Arc::new(harness().await);

    let request = h
        .broker
        .begin_authorization(ClientType::Web, REDIRECT, None)
        .await
        .unwrap();
    mount_idp(&h, nonce_of(&request.authorization_url), 1).await;

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let h = Arc::clone(&h);
            let state = request.state.clone();
            tokio::spawn(async move {
                h.broker
                    .complete_authorization(CallbackRequest::web("abc", state, REDIRECT))
                    .await
            })
        })
        .collect();

    let mut sessions = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => sessions += 1,
            Err(err) => assert!(matches!(err, AuthError::InvalidState { .. })),
        }
    }
    assert_eq!(sessions, 1);
}

#[tokio::test]
async fn login_invalidates_cached_profile() {
    let h = harness().await;
    h.stores
        .cache
        .set(&keys::user_profile("12345678"), "{}", Duration::from_secs(1800))
        .await
        .unwrap();

    let request = h
        .broker
        .begin_authorization(ClientType::Web, REDIRECT, None)
        .await
        .unwrap();
    mount_idp(&h, nonce_of(&request.authorization_url), 1).await;
    h.broker
        .complete_authorization(CallbackRequest::web("abc", &request.state, REDIRECT))
        .await
        .unwrap();

    assert!(
        h.stores
            .cache
            .get(&keys::user_profile("12345678"))
            .await
            .unwrap()
            .is_none()
    );
}
