mod test_utils;

use chatter_server::metrics;
use serde_json::json;
use serial_test::serial;
use test_utils::spawn_app;

#[tokio::test]
#[serial]
async fn test_signup_and_login_are_counted() {
    let app = spawn_app().await;
    let signups = metrics::SIGNUPS_TOTAL.get();
    let failures = metrics::LOGINS_TOTAL.with_label_values(&["failure"]).get();

    app.signup("pia", "pia@x.com", "secret1").await;
    app.post("/api/auth/login", json!({ "name": "pia", "password": "wrong-one" }))
        .await;

    assert_eq!(metrics::SIGNUPS_TOTAL.get(), signups + 1);
    assert_eq!(
        metrics::LOGINS_TOTAL.with_label_values(&["failure"]).get(),
        failures + 1
    );
}

#[tokio::test]
#[serial]
async fn test_metrics_endpoint_exposes_counters() {
    let app = spawn_app().await;
    app.get("/api/auth/captcha").await;

    let resp = app.get("/metrics").await;
    assert_eq!(resp.status().as_u16(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("chatter_captcha_challenges_issued_total"));
}
