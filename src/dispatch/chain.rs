//! Filter chain execution.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::dispatch::handler::{FilterRegistration, HandlerRegistration};
use crate::error::HostResult;
use crate::http::request::Request;
use crate::http::response::Response;

/// The remaining filters for one dispatch, ending in the target handler.
///
/// Consumed by `proceed`, so each link can run at most once.
pub struct FilterChain<'a> {
    filters: &'a [Arc<FilterRegistration>],
    handler: &'a HandlerRegistration,
}

impl<'a> FilterChain<'a> {
    pub(crate) fn new(filters: &'a [Arc<FilterRegistration>], handler: &'a HandlerRegistration) -> Self {
        Self { filters, handler }
    }

    /// Name of the handler at the end of the chain.
    pub fn handler_name(&self) -> &str {
        &self.handler.name
    }

    /// Run the next filter, or the handler when no filters remain.
    pub fn proceed<'r>(self, request: &'r mut Request, response: &'r Response) -> BoxFuture<'r, HostResult<()>>
    where
        'a: 'r,
    {
        Box::pin(async move {
            match self.filters.split_first() {
                Some((first, rest)) => {
                    tracing::trace!(filter = %first.name, "Entering filter");
                    let next = FilterChain::new(rest, self.handler);
                    first.filter.filter(request, response, next).await
                }
                None => {
                    tracing::trace!(handler = %self.handler.name, "Invoking handler");
                    self.handler.handler.handle(request, response).await
                }
            }
        })
    }
}
