// tests/metrics.rs
//
// One test only: the Prometheus recorder can be installed once per process.

mod common;

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use adaptive_insights::insight::StaticProvider;
use adaptive_insights::metrics::Metrics;
use adaptive_insights::MemoryStore;
use common::{engine, life_stage_report, now, seed_customer};

#[tokio::test]
async fn metrics_endpoint_exposes_cycle_series() {
    let metrics = Metrics::init().expect("recorder installs once");

    let store = Arc::new(MemoryStore::new());
    seed_customer(&store, "c1");
    let engine = engine(store, Arc::new(StaticProvider::new(life_stage_report())));
    engine.run_analysis_at(now(), "c1", 30).await.unwrap();

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "analytics_cycles_total{outcome=\"updated\"} 1",
        "analytics_llm_attempts_total{result=\"ok\"} 1",
        "analytics_profile_writes_total 1",
        "analytics_cycle_ms",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }

    assert!(Metrics::init().is_err(), "a second recorder must be refused");
}
