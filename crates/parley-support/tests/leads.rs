mod common;

use parley_support::leads::read_csv;
use parley_support::{AuthContext, SupportError};
use parley_types::api::CreateLeadRequest;

use common::{ScriptedModel, admin, eventually, harness, user};

fn lead_request(name: &str, email: &str) -> CreateLeadRequest {
    CreateLeadRequest {
        name: name.into(),
        email: email.into(),
        company: Some("Quotes \"R\" Us, Ltd".into()),
        phone: None,
        message: Some("Line one\nLine two".into()),
        source: None,
    }
}

#[tokio::test]
async fn capture_and_export() {
    let h = harness(ScriptedModel::failing());
    let anon = AuthContext::Anonymous;

    let lead = h
        .leads
        .capture(&anon, "peer", lead_request("Grace", " Grace@Example.com "))
        .await
        .unwrap();
    assert_eq!(lead.email, "grace@example.com");
    assert_eq!(lead.source, "website");

    assert!(matches!(
        h.leads.capture(&anon, "peer", lead_request("", "x@example.com")).await,
        Err(SupportError::InvalidInput(_))
    ));
    assert!(matches!(
        h.leads.capture(&anon, "peer", lead_request("Bad", "not-an-email")).await,
        Err(SupportError::InvalidInput(_))
    ));

    assert!(matches!(h.leads.export_csv(&user("u-1")).await, Err(SupportError::Forbidden)));

    let csv = h.leads.export_csv(&admin()).await.unwrap();
    let rows = read_csv(&csv).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].company, "Quotes \"R\" Us, Ltd");
    assert_eq!(rows[0].message, "Line one\nLine two");
}

#[tokio::test]
async fn enrichment_is_stored_limited_and_audited() {
    let h = harness(ScriptedModel::answering("Regional logistics firm, ~200 staff."));
    let lead = h
        .leads
        .capture(&AuthContext::Anonymous, "peer", lead_request("Linus", "linus@example.com"))
        .await
        .unwrap();

    let enriched = h.leads.enrich(&admin(), &lead.id).await.unwrap();
    assert_eq!(
        enriched.enrichment.as_deref(),
        Some("Regional logistics firm, ~200 staff.")
    );
    assert_eq!(
        h.db.get_lead(&lead.id).unwrap().unwrap().enrichment,
        enriched.enrichment
    );

    for _ in 0..4 {
        h.leads.enrich(&admin(), &lead.id).await.unwrap();
    }
    assert!(matches!(
        h.leads.enrich(&admin(), &lead.id).await,
        Err(SupportError::RateLimited { .. })
    ));
    assert_eq!(h.model.calls(), 5);

    let db = h.db.clone();
    eventually(move || db.count_ai_audit("lead:linus@example.com").unwrap() == 6).await;
}

#[tokio::test]
async fn enrichment_failure_surfaces_as_upstream() {
    let h = harness(ScriptedModel::failing());
    let lead = h
        .leads
        .capture(&AuthContext::Anonymous, "peer", lead_request("Ken", "ken@example.com"))
        .await
        .unwrap();

    assert!(matches!(
        h.leads.enrich(&admin(), &lead.id).await,
        Err(SupportError::Upstream(_))
    ));
    assert!(matches!(
        h.leads.enrich(&admin(), "missing").await,
        Err(SupportError::NotFound(_))
    ));
}
