use std::sync::Arc;

use leadstream_core::{
    ApiGateway, ClientId, LeadGateway, LeadId, StageCatalog, StageId, StageList, WebhookGateway,
};
use mockito::Matcher;
use pretty_assertions::assert_eq;
use serde_json::json;

fn acme() -> ClientId {
    ClientId::new("acme")
}

#[tokio::test]
async fn api_fetch_maps_leads_and_sends_client() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/leads")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({ "clientName": "acme" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "success": true,
                "leads": [
                    { "id": "L1", "name": "Ada", "phone": "555", "email": "ada@example.com", "stageid": 1 },
                    { "name": "A", "stageid": 3 },
                    { "id": "L3", "name": "No stage" }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let gw = ApiGateway::new(reqwest::Client::new(), Some(server.url()));
    let leads = gw.fetch_leads(&acme()).await;
    mock.assert_async().await;

    assert_eq!(leads.len(), 2);
    assert_eq!(leads[0].id, LeadId::from("L1"));
    assert_eq!(leads[0].email, "ada@example.com");
    assert!(!leads[1].id.as_str().is_empty());
    assert_eq!(leads[1].current_stage_id, StageId(3));
}

#[tokio::test]
async fn api_fetch_success_false_is_empty() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/leads")
        .with_status(200)
        .with_body(r#"{"success":false}"#)
        .create_async()
        .await;

    let gw = ApiGateway::new(reqwest::Client::new(), Some(server.url()));
    assert!(gw.fetch_leads(&acme()).await.is_empty());
}

#[tokio::test]
async fn api_fetch_server_error_is_empty() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/leads")
        .with_status(500)
        .with_body(r#"{"success":true,"leads":[{"id":"x","stageid":1}]}"#)
        .create_async()
        .await;

    let gw = ApiGateway::new(reqwest::Client::new(), Some(server.url()));
    assert!(gw.fetch_leads(&acme()).await.is_empty());
}

#[tokio::test]
async fn api_update_sends_payload_and_reports_flag() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
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

    let gw = ApiGateway::new(reqwest::Client::new(), Some(server.url()));
    assert!(gw.update_lead_stage(&LeadId::from("L1"), StageId(2), &acme()).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn api_update_failures_are_false() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/leads/update")
        .with_status(200)
        .with_body(r#"{"success":false}"#)
        .create_async()
        .await;
    let gw = ApiGateway::new(reqwest::Client::new(), Some(server.url()));
    assert!(!gw.update_lead_stage(&LeadId::from("L1"), StageId(2), &acme()).await);

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/leads/update")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;
    let gw = ApiGateway::new(reqwest::Client::new(), Some(server.url()));
    assert!(!gw.update_lead_stage(&LeadId::from("L1"), StageId(2), &acme()).await);

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/leads/update")
        .with_status(503)
        .create_async()
        .await;
    let gw = ApiGateway::new(reqwest::Client::new(), Some(server.url()));
    assert!(!gw.update_lead_stage(&LeadId::from("L1"), StageId(2), &acme()).await);
}

#[tokio::test]
async fn update_makes_exactly_one_attempt() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/leads/update")
        .with_status(502)
        .expect(1)
        .create_async()
        .await;

    let gw = ApiGateway::new(reqwest::Client::new(), Some(server.url()));
    assert!(!gw.update_lead_stage(&LeadId::from("L1"), StageId(2), &acme()).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn catalog_memoizes_remote_stages() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/stages")
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "stages": [
                    { "idstage": 10, "name": "Intake" },
                    { "idstage": 20, "name": "Won" }
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let gw = Arc::new(ApiGateway::new(reqwest::Client::new(), Some(server.url())));
    let catalog = StageCatalog::new(gw);

    let first = catalog.fetch_stages().await;
    let second = catalog.fetch_stages().await;
    mock.assert_async().await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.next_stage_id(StageId(10)), Some(StageId(20)));
    assert!(first.is_terminal(StageId(20)));
}

#[tokio::test]
async fn catalog_falls_back_when_stages_fail() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/stages")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let gw = Arc::new(ApiGateway::new(reqwest::Client::new(), Some(server.url())));
    let catalog = StageCatalog::new(gw);

    assert_eq!(*catalog.fetch_stages().await, StageList::defaults());
    // Fallback is not cached, so the backend is asked again.
    assert_eq!(*catalog.fetch_stages().await, StageList::defaults());
    mock.assert_async().await;
}

#[tokio::test]
async fn webhook_fetch_and_accepted_text() {
    let mut server = mockito::Server::new_async().await;
    let fetch = server
        .mock("POST", "/hooks/fetch")
        .match_body(Matcher::PartialJson(json!({
            "action": "fetch_leads",
            "clientName": "acme"
        })))
        .with_status(200)
        .with_body(r#"{"success":true,"leads":[{"id":"W1","name":"Web","stageid":2}]}"#)
        .create_async()
        .await;
    let update = server
        .mock("POST", "/hooks/update")
        .match_body(Matcher::PartialJson(json!({
            "action": "update_lead_stage",
            "leadID": "W1",
            "newStageId": 3,
            "source": "leadstream"
        })))
        .with_status(200)
        .with_body("Accepted")
        .create_async()
        .await;

    let gw = WebhookGateway::new(
        reqwest::Client::new(),
        Some(format!("{}/hooks/fetch", server.url())),
        vec![format!("{}/hooks/update", server.url())],
    );

    let leads = gw.fetch_leads(&acme()).await;
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].current_stage_id, StageId(2));
    assert!(gw.update_lead_stage(&LeadId::from("W1"), StageId(3), &acme()).await);

    fetch.assert_async().await;
    update.assert_async().await;
}

#[tokio::test]
async fn webhook_update_succeeds_if_any_hook_accepts() {
    let mut server = mockito::Server::new_async().await;
    let broken = server
        .mock("POST", "/hooks/a")
        .with_status(500)
        .create_async()
        .await;
    let ok = server
        .mock("POST", "/hooks/b")
        .with_status(200)
        .with_body(r#"{"success":true}"#)
        .create_async()
        .await;

    let gw = WebhookGateway::new(
        reqwest::Client::new(),
        None,
        vec![
            format!("{}/hooks/a", server.url()),
            format!("{}/hooks/b", server.url()),
        ],
    );
    assert!(gw.update_lead_stage(&LeadId::from("L1"), StageId(2), &acme()).await);
    broken.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn webhook_plain_text_fetch_is_empty() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/hooks/fetch")
        .with_status(200)
        .with_body("Accepted")
        .create_async()
        .await;

    let gw = WebhookGateway::new(
        reqwest::Client::new(),
        Some(format!("{}/hooks/fetch", server.url())),
        vec![],
    );
    assert!(gw.fetch_leads(&acme()).await.is_empty());
}
