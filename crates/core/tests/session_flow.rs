use std::sync::Arc;

use async_trait::async_trait;
use leadstream_core::{
    ApiGateway, AuthError, AuthState, Authenticator, ClientId, Identity, IdentityProvider,
    LeadId, LocalStore, NoticeLevel, RecordingNotifier, Session, SessionDeps, StageCatalog,
    StageId, TransitionOutcome,
};
use mockito::Matcher;
use serde_json::json;

struct AcmeProvider;

#[async_trait]
impl IdentityProvider for AcmeProvider {
    async fn current_session(&self) -> Result<Option<Identity>, AuthError> {
        Ok(Some(Identity {
            user_id: "u-1".into(),
            email: Some("owner@acme.test".into()),
            client: Some(ClientId::new("acme")),
        }))
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Identity, AuthError> {
        Ok(self.current_session().await?.unwrap())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

async fn signed_in(dir: &tempfile::TempDir) -> Arc<Authenticator> {
    let auth = Arc::new(Authenticator::new(
        Arc::new(AcmeProvider),
        LocalStore::new(dir.path()),
    ));
    assert_eq!(auth.restore().await, AuthState::SignedIn(ClientId::new("acme")));
    auth
}

#[tokio::test]
async fn advance_against_backend_updates_store_and_reconciles() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/stages")
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "stages": [{ "idstage": 1, "name": "New Lead" }, { "idstage": 2, "name": "Contacted" }]
            })
            .to_string(),
        )
        .create_async()
        .await;
    let fetches = server
        .mock("POST", "/api/leads")
        .match_body(Matcher::PartialJson(json!({ "clientName": "acme" })))
        .with_status(200)
        .with_body(r#"{"success":true,"leads":[{"id":"L1","name":"Ada","stageid":1}]}"#)
        .expect_at_least(1)
        .create_async()
        .await;
    let update = server
        .mock("POST", "/api/leads/update")
        .match_body(Matcher::PartialJson(json!({
            "clientName": "acme",
            "leadID": "L1",
            "newStageId": 2
        })))
        .with_status(200)
        .with_body(r#"{"success":true}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ApiGateway::new(reqwest::Client::new(), Some(server.url())));
    let notifier = Arc::new(RecordingNotifier::new());
    let mut deps = SessionDeps::new(
        gateway.clone(),
        Arc::new(StageCatalog::new(gateway)),
        signed_in(&dir).await,
        notifier.clone(),
    );
    deps.local = Some(LocalStore::new(dir.path()));

    let session = Session::start(deps).await.unwrap();
    session.synced().await;
    assert_eq!(session.stages().len(), 2);

    let outcome = session
        .controller()
        .transition_by_id(&LeadId::from("L1"), leadstream_core::Direction::Forward)
        .await;
    assert!(matches!(outcome, TransitionOutcome::Applied { to: StageId(2), .. }));
    update.assert_async().await;
    fetches.assert_async().await;
    assert_eq!(notifier.count(NoticeLevel::Success), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn failed_update_surfaces_one_error_and_keeps_stage() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/stages")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("POST", "/api/leads")
        .with_status(200)
        .with_body(r#"{"success":true,"leads":[{"id":"L1","name":"Ada","stageid":3}]}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/api/leads/update")
        .with_status(500)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ApiGateway::new(reqwest::Client::new(), Some(server.url())));
    let notifier = Arc::new(RecordingNotifier::new());
    let deps = SessionDeps::new(
        gateway.clone(),
        Arc::new(StageCatalog::new(gateway)),
        signed_in(&dir).await,
        notifier.clone(),
    );

    let session = Session::start(deps).await.unwrap();
    session.synced().await;
    // Stage endpoint failed: the built-in pipeline is in use.
    assert_eq!(session.stages().len(), 7);

    let lead = session.store().get(&LeadId::from("L1")).unwrap();
    let outcome = session.controller().advance(&lead).await;

    assert_eq!(outcome, TransitionOutcome::Failed);
    assert_eq!(
        session.store().get(&lead.id).unwrap().current_stage_id,
        StageId(3)
    );
    assert_eq!(notifier.count(NoticeLevel::Error), 1);
    assert!(!session.store().mutation_flag());

    session.shutdown().await;
}
