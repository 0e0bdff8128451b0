//! `FetchChannel` over the CDP `Fetch` domain of a chromiumoxide page.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, ContinueResponseParams, EnableParams, EventRequestPaused,
    FailRequestParams, FulfillRequestParams, GetResponseBodyParams, HeaderEntry, RequestId,
    RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::{FetchChannel, InterceptedExchange, Interceptor, ResourceKind, ResponseBody};
use crate::config::SiteProfile;

/// Resolves exchanges by issuing `Fetch.*` commands on a page.
#[derive(Clone)]
pub struct CdpFetchChannel {
    page: Page,
}

impl CdpFetchChannel {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl FetchChannel for CdpFetchChannel {
    async fn get_response_body(&self, request_id: &str) -> Result<ResponseBody> {
        let returns = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(request_id)))
            .await
            .context("Fetch.getResponseBody failed")?;
        Ok(ResponseBody {
            body: returns.result.body.clone(),
            base64_encoded: returns.result.base64_encoded,
        })
    }

    async fn fulfill(
        &self,
        request_id: &str,
        status: i64,
        headers: &[(String, String)],
        body_base64: String,
    ) -> Result<()> {
        let params = FulfillRequestParams::builder()
            .request_id(RequestId::new(request_id))
            .response_code(status)
            .response_headers(
                headers
                    .iter()
                    .map(|(name, value)| HeaderEntry::new(name.clone(), value.clone()))
                    .collect::<Vec<_>>(),
            )
            .body(body_base64)
            .build()
            .map_err(|e| anyhow!("invalid fulfill params: {e}"))?;
        self.page
            .execute(params)
            .await
            .context("Fetch.fulfillRequest failed")?;
        Ok(())
    }

    async fn continue_response(&self, request_id: &str) -> Result<()> {
        self.page
            .execute(ContinueResponseParams::new(RequestId::new(request_id)))
            .await
            .context("Fetch.continueResponse failed")?;
        Ok(())
    }

    async fn continue_request(&self, request_id: &str, intercept_response: bool) -> Result<()> {
        let params = ContinueRequestParams::builder()
            .request_id(RequestId::new(request_id))
            .intercept_response(intercept_response)
            .build()
            .map_err(|e| anyhow!("invalid continue params: {e}"))?;
        self.page
            .execute(params)
            .await
            .context("Fetch.continueRequest failed")?;
        Ok(())
    }

    async fn fail_request(&self, request_id: &str, reason: &str) -> Result<()> {
        let reason = reason.parse::<ErrorReason>().unwrap_or(ErrorReason::Failed);
        self.page
            .execute(FailRequestParams::new(RequestId::new(request_id), reason))
            .await
            .context("Fetch.failRequest failed")?;
        Ok(())
    }
}

/// Fetch patterns: target documents and utility scripts, paused at the
/// response stage. Nothing else is paused.
fn patterns(site: &SiteProfile) -> Vec<RequestPattern> {
    vec![
        RequestPattern::builder()
            .url_pattern(site.document_pattern())
            .resource_type(ResourceType::Document)
            .request_stage(RequestStage::Response)
            .build(),
        RequestPattern::builder()
            .url_pattern(site.script_pattern.clone())
            .resource_type(ResourceType::Script)
            .request_stage(RequestStage::Response)
            .build(),
    ]
}

fn exchange_from_event(event: &EventRequestPaused) -> InterceptedExchange {
    let resource = match &event.resource_type {
        ResourceType::Document => ResourceKind::Document,
        ResourceType::Script => ResourceKind::Script,
        other => ResourceKind::Other(other.as_ref().to_string()),
    };
    InterceptedExchange {
        request_id: event.request_id.inner().clone(),
        url: event.request.url.clone(),
        resource,
        status_code: event.response_status_code,
        error_reason: event
            .response_error_reason
            .as_ref()
            .map(|r| r.as_ref().to_string()),
        headers: event
            .response_headers
            .iter()
            .flatten()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect(),
    }
}

/// Handler attached to one page.
pub struct Interception {
    task: JoinHandle<()>,
    failed: Arc<AtomicBool>,
}

impl Interception {
    /// An exchange could not be resolved and the page was closed.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn detach(&self) {
        self.task.abort();
    }
}

/// Enable interception on a page and spawn its handler. Each paused
/// exchange is resolved on its own task; a resolution error closes the page.
pub async fn attach(page: &Page, site: Arc<SiteProfile>) -> Result<Interception> {
    let mut events = page
        .event_listener::<EventRequestPaused>()
        .await
        .context("failed to listen for paused requests")?;
    page.execute(EnableParams::builder().patterns(patterns(&site)).build())
        .await
        .context("Fetch.enable failed")?;

    let interceptor = Arc::new(Interceptor::new(site));
    let channel = Arc::new(CdpFetchChannel::new(page.clone()));
    let failed = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&failed);
    let task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let exchange = exchange_from_event(&event);
            let interceptor = Arc::clone(&interceptor);
            let channel = Arc::clone(&channel);
            let flag = Arc::clone(&flag);
            tokio::spawn(async move {
                if let Err(e) = interceptor.resolve(&exchange, channel.as_ref()).await {
                    tracing::error!(url = %exchange.url, "exchange left unresolved, closing page: {e:#}");
                    flag.store(true, Ordering::SeqCst);
                    if let Err(e) = channel.page.clone().close().await {
                        tracing::debug!("page already gone: {e}");
                    }
                }
            });
        }
        tracing::debug!("interception stream ended");
    });
    Ok(Interception { task, failed })
}
