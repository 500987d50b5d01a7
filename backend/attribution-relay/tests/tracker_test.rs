// Postback delivery against a mock tracker

use attribution_relay::config::TrackerConfig;
use attribution_relay::models::Postback;
use attribution_relay::services::{HttpCallError, TrackerClient};
use reqwest::StatusCode;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tracker_for(server: &MockServer, max_attempts: u32) -> TrackerClient {
    TrackerClient::new(&TrackerConfig {
        base_url: format!("{}/postback", server.uri()),
        request_timeout: Duration::from_secs(5),
        max_attempts,
        retry_delay: Duration::from_millis(10),
    })
    .unwrap()
}

#[tokio::test]
async fn postback_carries_conversion_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/postback"))
        .and(query_param("cnv_id", "sub-42"))
        .and(query_param("cnv_status", "trial_converted"))
        .and(query_param("event4", "1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 3);
    let status = tracker
        .send(Postback::TrialConverted, "sub-42")
        .await
        .unwrap();

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn every_postback_sets_exactly_one_event_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 1);
    for postback in [
        Postback::Install,
        Postback::TrialStarted,
        Postback::TrialConfirmed,
        Postback::TrialConverted,
        Postback::TrialCancelled,
    ] {
        tracker.send(postback, "s").await.unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    let seen: Vec<(String, String)> = requests
        .iter()
        .map(|request| {
            let pairs: Vec<(String, String)> = request
                .url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let status = pairs
                .iter()
                .find(|(k, _)| k == "cnv_status")
                .map(|(_, v)| v.clone())
                .unwrap();
            let flags: Vec<_> = pairs.iter().filter(|(k, _)| k.starts_with("event")).collect();
            assert_eq!(flags.len(), 1);
            assert_eq!(flags[0].1, "1");
            (status, flags[0].0.clone())
        })
        .collect();

    let expected = [
        ("install", "event1"),
        ("trial_started", "event2"),
        ("trial_started", "event2"),
        ("trial_converted", "event4"),
        ("trial_renewal_cancelled", "event5"),
    ];
    let expected: Vec<(String, String)> = expected
        .iter()
        .map(|(s, f)| (s.to_string(), f.to_string()))
        .collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn server_errors_use_the_whole_attempt_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 4);
    let failure = tracker.send(Postback::Install, "s").await.unwrap_err();

    assert_eq!(failure.attempts, 4);
    assert_eq!(failure.last_status, Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(matches!(failure.last_error, HttpCallError::Status(_)));
    assert!(failure.to_string().contains("after 4 attempts"));
}

#[tokio::test]
async fn transient_failures_recover_before_budget_runs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 5);
    let status = tracker.send(Postback::TrialStarted, "s").await.unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn client_errors_are_retried_like_any_other_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 2);
    let failure = tracker.send(Postback::TrialCancelled, "s").await.unwrap_err();

    assert_eq!(failure.last_status, Some(StatusCode::NOT_FOUND));
    assert!(failure.last_error.to_string().starts_with("Http Error"));
}

#[tokio::test]
async fn slow_tracker_is_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let tracker = TrackerClient::new(&TrackerConfig {
        base_url: format!("{}/postback", server.uri()),
        request_timeout: Duration::from_millis(50),
        max_attempts: 1,
        retry_delay: Duration::from_millis(1),
    })
    .unwrap();

    let failure = tracker.send(Postback::Install, "s").await.unwrap_err();
    assert_eq!(failure.attempts, 1);
    assert!(matches!(failure.last_error, HttpCallError::Timeout(_)));
}
