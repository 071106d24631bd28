//! Shared handlers and helpers for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use app_host::config::HostConfig;
use app_host::http::{InboundMessage, OutboundMessage, Request, Response};
use app_host::{Filter, FilterChain, Handler, Host, HostResult};

/// Writes a fixed body.
pub struct Text(pub &'static str);

#[async_trait]
impl Handler for Text {
    async fn handle(&self, _request: &mut Request, response: &Response) -> HostResult<()> {
        response.write_str(self.0)
    }
}

/// Wraps the rest of the chain in `name<` … `>name`.
pub struct Wrap(pub &'static str);

#[async_trait]
impl Filter for Wrap {
    async fn filter(&self, request: &mut Request, response: &Response, chain: FilterChain<'_>) -> HostResult<()> {
        response.write_str(&format!("{}<", self.0))?;
        chain.proceed(request, response).await?;
        response.write_str(&format!(">{}", self.0))
    }
}

/// Records every pass through the filter.
#[derive(Clone, Default)]
pub struct Tally {
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl Tally {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Filter for Tally {
    async fn filter(&self, request: &mut Request, response: &Response, chain: FilterChain<'_>) -> HostResult<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{:?} {}", request.dispatch_type(), request.path()));
        chain.proceed(request, response).await
    }
}

/// Config with the background session sweep switched off.
pub fn test_config() -> HostConfig {
    let mut config = HostConfig::default();
    config.session.sweep_interval_secs = 0;
    config
}

pub fn test_host() -> Host {
    Host::new(test_config())
}

pub async fn get(host: &Host, uri: &str) -> OutboundMessage {
    host.handle(InboundMessage::get(uri)).await.unwrap()
}

/// The `name=value` pair of the first `Set-Cookie` header.
pub fn set_cookie_pair(out: &OutboundMessage) -> Option<String> {
    out.header("set-cookie")
        .and_then(|c| c.split(';').next())
        .map(str::to_string)
}
