// Copyright 2026 weread-extract contributors
// SPDX-License-Identifier: Apache-2.0

//! Response interception.
//!
//! Each page gets one handler on the CDP `Fetch` domain. Paused exchanges are
//! planned by [`exchange::plan`] and resolved through a [`FetchChannel`], so
//! the resolution logic runs the same against a live page and against a
//! recording channel in tests.
//!
//! Every exchange is resolved exactly once. An error while resolving leaves
//! the exchange paused, which stalls the page; callers treat it as fatal to
//! the page.

pub mod chromium;
pub mod exchange;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::SiteProfile;
use crate::rewrite;
pub use exchange::{Category, Disposition, InterceptedExchange, ResourceKind, ResponseBody};

/// The operations that resolve a paused exchange.
#[async_trait]
pub trait FetchChannel: Send + Sync {
    async fn get_response_body(&self, request_id: &str) -> Result<ResponseBody>;

    /// Respond with `body_base64` instead of the network response.
    async fn fulfill(
        &self,
        request_id: &str,
        status: i64,
        headers: &[(String, String)],
        body_base64: String,
    ) -> Result<()>;

    async fn continue_response(&self, request_id: &str) -> Result<()>;

    async fn continue_request(&self, request_id: &str, intercept_response: bool) -> Result<()>;

    async fn fail_request(&self, request_id: &str, reason: &str) -> Result<()>;
}

/// How an exchange ended up being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Fulfilled,
    ContinuedResponse,
    ContinuedRequest,
    Failed,
}

/// Plans and resolves paused exchanges for one site.
#[derive(Debug, Clone)]
pub struct Interceptor {
    site: Arc<SiteProfile>,
}

impl Interceptor {
    pub fn new(site: Arc<SiteProfile>) -> Self {
        Self { site }
    }

    pub fn site(&self) -> &SiteProfile {
        &self.site
    }

    /// Resolve one exchange.
    pub async fn resolve(
        &self,
        exchange: &InterceptedExchange,
        channel: &dyn FetchChannel,
    ) -> Result<Resolution> {
        let id = exchange.request_id.as_str();
        match exchange::plan(&self.site, exchange) {
            Disposition::ContinueRequest { intercept_response } => {
                channel.continue_request(id, intercept_response).await?;
                Ok(Resolution::ContinuedRequest)
            }
            Disposition::ContinueResponse => {
                channel.continue_response(id).await?;
                Ok(Resolution::ContinuedResponse)
            }
            Disposition::FailRequest(reason) => {
                tracing::debug!(url = %exchange.url, %reason, "releasing network failure");
                channel.fail_request(id, &reason).await?;
                Ok(Resolution::Failed)
            }
            Disposition::Rewrite(category) => {
                let body = match channel.get_response_body(id).await {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!(url = %exchange.url, "body unavailable, releasing as is: {e:#}");
                        channel.continue_response(id).await?;
                        return Ok(Resolution::ContinuedResponse);
                    }
                };
                let Some(text) = exchange::decode_body(&body) else {
                    tracing::warn!(url = %exchange.url, "body not decodable, releasing as is");
                    channel.continue_response(id).await?;
                    return Ok(Resolution::ContinuedResponse);
                };
                let rewritten = match category {
                    Category::Document => rewrite::rewrite_document(&self.site, &exchange.url, &text),
                    Category::UtilityScript => {
                        rewrite::rewrite_script(&self.site, &exchange.url, &text)
                    }
                    Category::Passthrough => text,
                };
                channel
                    .fulfill(
                        id,
                        exchange.status_code.unwrap_or(200),
                        &exchange.fulfill_headers(),
                        exchange::encode_body(&rewritten),
                    )
                    .await?;
                Ok(Resolution::Fulfilled)
            }
        }
    }
}
