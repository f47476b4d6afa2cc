use std::sync::Arc;

use super::common::{backend, metadata, wait_for, wait_for_sign_out, FlakyBackend, PASSWORD};
use crate::workflows::roles::account::{
    request_password_reset, reset_password, sign_in, sign_out, AccountError,
};
use crate::workflows::roles::repository::{AuthError, AuthService};
use crate::workflows::roles::session::SessionProvider;
use crate::workflows::roles::validation::ValidationError;

#[tokio::test]
async fn start_resolves_an_existing_session() {
    let backend = backend();
    let user = backend
        .register("dana@haulers.example", PASSWORD, metadata("Dana Hauler"))
        .expect("register");
    backend
        .sign_in("dana@haulers.example", PASSWORD)
        .await
        .expect("sign in");

    let session = SessionProvider::start(Arc::clone(&backend)).await;

    assert!(!session.is_loading());
    assert_eq!(session.current_user().map(|user| user.id), Some(user.id));
    assert!(session.is_listening());
}

#[tokio::test]
async fn sign_in_and_out_propagate_to_observers() {
    let backend = backend();
    let user = backend
        .register("dana@haulers.example", PASSWORD, metadata("Dana Hauler"))
        .expect("register");
    let session = SessionProvider::start(Arc::clone(&backend)).await;
    assert!(session.current_user().is_none());
    assert!(!session.is_loading());

    sign_in(backend.as_ref(), " dana@haulers.example ", PASSWORD)
        .await
        .expect("signed in");
    wait_for(&session, &user).await;
    assert_eq!(
        session.current_user().and_then(|user| user.full_name().map(str::to_string)),
        Some("Dana Hauler".to_string())
    );

    sign_out(backend.as_ref()).await.expect("signed out");
    wait_for_sign_out(&session).await;
    assert!(session.session().is_none());
}

#[tokio::test]
async fn shutdown_stops_listening_but_keeps_last_state() {
    let backend = backend();
    let user = backend
        .register("dana@haulers.example", PASSWORD, metadata("Dana Hauler"))
        .expect("register");
    let session = SessionProvider::start(Arc::clone(&backend)).await;
    backend
        .sign_in("dana@haulers.example", PASSWORD)
        .await
        .expect("sign in");
    wait_for(&session, &user).await;

    session.shutdown();
    tokio::task::yield_now().await;
    assert!(!session.is_listening());

    backend.sign_out().await.expect("sign out");
    tokio::task::yield_now().await;
    assert_eq!(session.current_user().map(|user| user.id), Some(user.id));
}

#[tokio::test]
async fn failed_lookup_starts_signed_out() {
    let memory = backend();
    let flaky = FlakyBackend::new(Arc::clone(&memory));
    flaky.inject(|faults| {
        faults.current_session = Some(AuthError::Unavailable("connection refused".to_string()))
    });

    let session = SessionProvider::start(Arc::clone(&flaky)).await;

    let state = session.state();
    assert!(state.session.is_none());
    assert!(!state.loading);
}

#[tokio::test]
async fn wrong_password_is_translated() {
    let backend = backend();
    backend
        .register("dana@haulers.example", PASSWORD, metadata("Dana Hauler"))
        .expect("register");

    let error = sign_in(backend.as_ref(), "dana@haulers.example", "not-the-password")
        .await
        .expect_err("rejected");
    assert_eq!(error.user_message(), "Invalid e-mail or password");

    let error = sign_in(backend.as_ref(), "dana@haulers.example", "")
        .await
        .expect_err("password required");
    assert!(matches!(
        error,
        AccountError::Validation(ValidationError::MissingField("password"))
    ));
}

#[tokio::test]
async fn password_reset_checks_the_address_locally() {
    let backend = backend();

    let error = request_password_reset(backend.as_ref(), "not-an-address")
        .await
        .expect_err("invalid address");
    assert!(matches!(error, AccountError::Validation(ValidationError::InvalidEmail)));
    assert!(backend.password_reset_requests().is_empty());

    request_password_reset(backend.as_ref(), "Dana@Haulers.example")
        .await
        .expect("sent");
    assert_eq!(backend.password_reset_requests(), vec!["dana@haulers.example"]);
}

#[tokio::test]
async fn new_password_must_match_and_session_must_exist() {
    let backend = backend();

    let error = reset_password(backend.as_ref(), "fresh-pass-1", "fresh-pass-2")
        .await
        .expect_err("mismatch");
    assert!(matches!(error, AccountError::Validation(ValidationError::PasswordMismatch)));

    let error = reset_password(backend.as_ref(), "fresh-pass-1", "fresh-pass-1")
        .await
        .expect_err("no session");
    assert!(matches!(error, AccountError::Auth(AuthError::Unauthenticated)));

    backend
        .register("dana@haulers.example", PASSWORD, metadata("Dana Hauler"))
        .expect("register");
    sign_in(backend.as_ref(), "dana@haulers.example", PASSWORD)
        .await
        .expect("signed in");
    reset_password(backend.as_ref(), "fresh-pass-1", "fresh-pass-1")
        .await
        .expect("updated");
    sign_in(backend.as_ref(), "dana@haulers.example", "fresh-pass-1")
        .await
        .expect("new password works");
}
