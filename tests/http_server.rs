//! End-to-end tests over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use app_host::application::DeploymentUnit;
use app_host::config::HostConfig;
use app_host::http::{HttpServer, Request, Response};
use app_host::{Handler, Host, HostResult, Shutdown};

mod common;
use common::{test_config, Text};

/// Echoes form parameters and counts session visits.
struct Visits;

#[async_trait]
impl Handler for Visits {
    async fn handle(&self, request: &mut Request, response: &Response) -> HostResult<()> {
        let who = request.parameter("who").unwrap_or("nobody").to_string();
        let session = request.session(true);
        let visits = session
            .map(|s| {
                let count = s.attribute::<usize>("visits").map(|v| *v).unwrap_or(0) + 1;
                s.set_attribute("visits", count);
                count
            })
            .unwrap_or(0);
        response.set_content_type("text/plain")?;
        response.write_str(&format!("{} {}", who, visits))
    }
}

async fn start(config: HostConfig) -> (SocketAddr, Shutdown, JoinHandle<()>) {
    let host = Host::new(config);
    host.deploy(
        DeploymentUnit::new("shop.war")
            .handler("visits", Visits, &["/visits"])
            .handler("hello", Text("hello"), &["/hello"]),
    )
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(Arc::new(host));
    let rx = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });
    (addr, shutdown, handle)
}

#[tokio::test]
async fn serves_and_shuts_down_gracefully() {
    let (addr, shutdown, handle) = start(test_config()).await;
    let client = reqwest::Client::new();

    let res = client.get(format!("http://{}/shop/hello", addr)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hello");

    let res = client.get(format!("http://{}/nothing", addr)).send().await.unwrap();
    assert_eq!(res.status(), 404);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
}

#[tokio::test]
async fn session_cookie_round_trip() {
    let (addr, shutdown, _handle) = start(test_config()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/shop/visits?who=ada", addr);

    let first = client.get(&url).send().await.unwrap();
    let cookie = first
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.contains("Path=/shop"));
    assert_eq!(first.text().await.unwrap(), "ada 1");

    let pair = cookie.split(';').next().unwrap().to_string();
    let second = client.get(&url).header("Cookie", pair).send().await.unwrap();
    assert!(second.headers().get("set-cookie").is_none());
    assert_eq!(second.text().await.unwrap(), "ada 2");

    shutdown.trigger();
}

#[tokio::test]
async fn form_body_parameters_are_opt_in() {
    let client = reqwest::Client::new();

    let (addr, shutdown, _handle) = start(test_config()).await;
    let res = client
        .post(format!("http://{}/shop/visits", addr))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("who=grace")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "nobody 1");
    shutdown.trigger();

    let mut config = test_config();
    config.dispatch.decode_form_body = true;
    let (addr, shutdown, _handle) = start(config).await;
    let res = client
        .post(format!("http://{}/shop/visits?who=query", addr))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("who=grace")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "query 1");

    let res = client
        .post(format!("http://{}/shop/visits", addr))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("who=grace")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "grace 1");
    shutdown.trigger();
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let mut config = test_config();
    config.listener.max_body_bytes = 8;
    let (addr, shutdown, _handle) = start(config).await;

    let res = reqwest::Client::new()
        .post(format!("http://{}/shop/hello", addr))
        .body("far more than eight bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    shutdown.trigger();
}
