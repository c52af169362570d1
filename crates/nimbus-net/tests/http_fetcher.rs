//! HttpFetcher against a real local HTTP server.

use std::time::Duration;

use nimbus_net::{Fetcher, HttpFetcher, LoaderConfig, Request, RequestMode, ResponseType};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher_for(origin: &str) -> HttpFetcher {
    let config = LoaderConfig::new(Url::parse(origin).unwrap()).timeout(Duration::from_secs(5));
    HttpFetcher::new(config).unwrap()
}

#[tokio::test]
async fn test_same_origin_response_is_basic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server.uri());
    let request = Request::parse(&format!("{}/index.html", server.uri())).unwrap();
    let response = fetcher.fetch(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.response_type, ResponseType::Basic);
    assert!(!response.from_cache);
    assert_eq!(response.text().unwrap(), "<html></html>");
}

#[tokio::test]
async fn test_error_status_is_not_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(path("/missing.js"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server.uri());
    let request = Request::parse(&format!("{}/missing.js", server.uri())).unwrap();
    let response = fetcher.fetch(&request).await.unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.ok());
}

#[tokio::test]
async fn test_cross_origin_responses_are_cors_or_opaque() {
    let api = MockServer::start().await;
    Mock::given(path("/v1/current.json"))
        .and(query_param("q", "London"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .mount(&api)
        .await;

    let fetcher = fetcher_for("http://localhost:3000");
    let url = format!("{}/v1/current.json?q=London", api.uri());

    let cors = fetcher.fetch(&Request::parse(&url).unwrap()).await.unwrap();
    assert_eq!(cors.response_type, ResponseType::Cors);
    assert_eq!(cors.status, 200);

    let opaque = fetcher
        .fetch(&Request::parse(&url).unwrap().mode(RequestMode::NoCors))
        .await
        .unwrap();
    assert_eq!(opaque.response_type, ResponseType::Opaque);
    assert_eq!(opaque.status, 0);
    assert_eq!(opaque.body_len(), 0);
}

#[tokio::test]
async fn test_unfollowed_redirect_is_opaque_redirect() {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&server)
        .await;

    let config = LoaderConfig::new(Url::parse(&server.uri()).unwrap()).max_redirects(0);
    let fetcher = HttpFetcher::new(config).unwrap();
    let response = fetcher
        .fetch(&Request::parse(&format!("{}/old", server.uri())).unwrap())
        .await
        .unwrap();

    assert_eq!(response.response_type, ResponseType::OpaqueRedirect);
    assert_eq!(response.status, 0);
}

#[tokio::test]
async fn test_redirect_to_other_origin_is_not_basic() {
    let origin = MockServer::start().await;
    let cdn = MockServer::start().await;
    Mock::given(path("/x.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("foreign"))
        .mount(&cdn)
        .await;
    Mock::given(path("/app.js"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/x.js", cdn.uri()).as_str()),
        )
        .mount(&origin)
        .await;

    let fetcher = fetcher_for(&origin.uri());
    let response = fetcher
        .fetch(&Request::parse(&format!("{}/app.js", origin.uri())).unwrap())
        .await
        .unwrap();

    assert!(response.redirected);
    assert_eq!(response.status, 200);
    assert_eq!(response.url.as_str(), format!("{}/x.js", cdn.uri()));
    assert_eq!(response.response_type, ResponseType::Cors);
}

#[tokio::test]
async fn test_unreachable_host_rejects() {
    // Nothing listens on port 1.
    let uri = "http://127.0.0.1:1".to_string();

    let fetcher = fetcher_for(&uri);
    let result = fetcher
        .fetch(&Request::parse(&format!("{}/index.html", uri)).unwrap())
        .await;
    assert!(result.is_err());
}
