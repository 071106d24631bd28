//! Isolation between applications deployed on one host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use tokio::sync::Notify;

use app_host::application::DeploymentUnit;
use app_host::http::{InboundMessage, Request, Response};
use app_host::{Handler, Host, HostResult};

mod common;
use common::{get, set_cookie_pair, test_config, test_host, Text};

/// Reports whether the session existed before this request.
struct SessionProbe;

#[async_trait]
impl Handler for SessionProbe {
    async fn handle(&self, request: &mut Request, response: &Response) -> HostResult<()> {
        let existed = request.session(false).is_some();
        let session = request.session(true);
        let id = session.map(|s| s.id().to_string()).unwrap_or_default();
        response.write_str(&format!("{} {}", if existed { "existing" } else { "new" }, id))
    }
}

#[tokio::test]
async fn same_handler_path_in_two_applications() {
    let host = test_host();
    host.deploy(DeploymentUnit::new("app1").handler("hello", Text("from app1"), &["/hello"]))
        .unwrap();
    host.deploy(DeploymentUnit::new("app2").handler("hello", Text("from app2"), &["/hello"]))
        .unwrap();

    assert_eq!(get(&host, "/app1/hello").await.body_text(), "from app1");
    assert_eq!(get(&host, "/app2/hello").await.body_text(), "from app2");
    assert_eq!(get(&host, "/app3/hello").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_ids_do_not_cross_applications() {
    let host = test_host();
    host.deploy(DeploymentUnit::new("app1").handler("s", SessionProbe, &["/s"])).unwrap();
    host.deploy(DeploymentUnit::new("app2").handler("s", SessionProbe, &["/s"])).unwrap();

    let first = get(&host, "/app1/s").await;
    assert!(first.body_text().starts_with("new "));
    let pair = set_cookie_pair(&first).unwrap();

    let again = host
        .handle(InboundMessage::get("/app1/s").with_header("Cookie", &pair))
        .await
        .unwrap();
    assert!(again.body_text().starts_with("existing "));

    let other = host
        .handle(InboundMessage::get("/app2/s").with_header("Cookie", &pair))
        .await
        .unwrap();
    assert!(other.body_text().starts_with("new "));
    // The client-supplied id is reused, so no new cookie is sent.
    assert!(other.header("set-cookie").is_none());

    let app1 = host.registry().get("/app1").unwrap();
    let app2 = host.registry().get("/app2").unwrap();
    assert_eq!(app1.sessions().len(), 1);
    assert_eq!(app2.sessions().len(), 1);
}

#[tokio::test]
async fn cookie_wins_over_url_parameter() {
    let host = test_host();
    host.deploy(DeploymentUnit::new("app").handler("s", SessionProbe, &["/s"])).unwrap();

    let out = host
        .handle(InboundMessage::get("/app/s?jsessionid=from-url").with_header("Cookie", "JSESSIONID=from-cookie"))
        .await
        .unwrap();
    assert_eq!(out.body_text(), "new from-cookie");

    let out = get(&host, "/app/s?jsessionid=from-url").await;
    assert_eq!(out.body_text(), "new from-url");
    assert_eq!(set_cookie_pair(&out).as_deref(), Some("JSESSIONID=from-url"));
}

#[tokio::test]
async fn root_application_takes_unowned_paths() {
    let host = test_host();
    host.deploy(DeploymentUnit::new("ROOT").mount("/").handler("any", Text("root"), &["/"]))
        .unwrap();
    host.deploy(DeploymentUnit::new("app1").handler("any", Text("app1"), &["/"]))
        .unwrap();

    assert_eq!(get(&host, "/app1/x").await.body_text(), "app1");
    assert_eq!(get(&host, "/app10/x").await.body_text(), "root");
    assert_eq!(get(&host, "/").await.body_text(), "root");
}

/// Blocks until released.
struct Gate(Arc<Notify>);

#[async_trait]
impl Handler for Gate {
    async fn handle(&self, _request: &mut Request, response: &Response) -> HostResult<()> {
        self.0.notified().await;
        response.write_str("released")
    }
}

#[tokio::test]
async fn saturated_application_does_not_starve_another() {
    let mut config = test_config();
    config.pool.workers_per_application = 1;
    let host = Arc::new(Host::new(config));
    let gate = Arc::new(Notify::new());
    host.deploy(DeploymentUnit::new("slow").handler("g", Gate(Arc::clone(&gate)), &["/g"]))
        .unwrap();
    host.deploy(DeploymentUnit::new("fast").handler("f", Text("fast"), &["/f"]))
        .unwrap();

    let blocked = {
        let host = Arc::clone(&host);
        tokio::spawn(async move { host.handle(InboundMessage::get("/slow/g")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(host.registry().get("/slow").unwrap().pool().in_flight(), 1);

    let fast = tokio::time::timeout(Duration::from_secs(1), get(&host, "/fast/f"))
        .await
        .expect("fast application was starved");
    assert_eq!(fast.body_text(), "fast");

    gate.notify_one();
    let slow = blocked.await.unwrap().unwrap();
    assert_eq!(slow.body_text(), "released");
}
