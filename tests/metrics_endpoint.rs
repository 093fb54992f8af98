use reflector::{app, AppState, ReflectMode};
use reqwest::Client;
use tokio::net::TcpListener;

// Smoke test for /metrics after a mix of reflected requests.
#[tokio::test]
async fn metrics_counts_reflected_requests() {
    let state = AppState::new(ReflectMode::Introspect, "9.9.9");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(state.clone());
    let _h = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = format!("http://{}/", addr);
    for body in [r#"{"ok":1}"#, r#"{"ok":2}"#, "{bad"] {
        let resp = Client::new()
            .post(&url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }
    let _ = Client::new().get(&url).send().await.unwrap();

    let resp = Client::new()
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let text = resp.text().await.unwrap();
    assert!(text.contains("reflector_requests_total 4"));
    assert!(text.contains("reflector_decode_errors_total 1"));
    assert!(text.contains("reflector_classification_total{classification=\"JSON\"} 3"));
    assert!(text.contains("reflector_classification_total{classification=\"NO_BODY\"} 1"));
    assert!(text.contains("reflector_request_latency_ms_bucket{le=\"+Inf\"} 4"));
    assert!(text.contains("reflector_build_info{version=\"9.9.9\"} 1"));
    let help_occurrences = text.matches("# HELP reflector_request_latency_ms ").count();
    assert_eq!(help_occurrences, 1);
    assert!(text.contains("reflector_process_uptime_seconds"));

    // Counters live on the shared state handle as well.
    assert_eq!(state.metrics.requests_total(), 4);
}
