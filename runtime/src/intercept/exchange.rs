//! Paused exchanges and how each one is resolved.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::SiteProfile;

/// Resource type reported with a paused exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Script,
    Other(String),
}

/// Which transform an exchange is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Document,
    UtilityScript,
    Passthrough,
}

/// One paused network exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptedExchange {
    pub request_id: String,
    pub url: String,
    pub resource: ResourceKind,
    /// Present once the response head has arrived.
    pub status_code: Option<i64>,
    /// Present when the request failed at the network level.
    pub error_reason: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// Buffered body of a terminal exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBody {
    pub body: String,
    pub base64_encoded: bool,
}

/// What to do with an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Fetch the body, transform it, fulfill with the result.
    Rewrite(Category),
    /// Release the response untouched.
    ContinueResponse,
    /// Release a network failure with its reason.
    FailRequest(String),
    /// Release the request, pausing again at the response when asked.
    ContinueRequest { intercept_response: bool },
}

const REDIRECT_CODES: &[i64] = &[301, 302, 303, 307, 308];

/// Headers describing the original body bytes; they would be wrong for a
/// transformed body.
const BODY_HEADERS: &[&str] = &["content-length", "content-encoding"];

impl InterceptedExchange {
    /// A response head or a network error has arrived.
    pub fn is_terminal(&self) -> bool {
        self.status_code.is_some() || self.error_reason.is_some()
    }

    pub fn is_redirect(&self) -> bool {
        self.status_code
            .is_some_and(|code| REDIRECT_CODES.contains(&code))
    }

    /// Response headers to send along with a transformed body.
    pub fn fulfill_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|(name, _)| !BODY_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
            .cloned()
            .collect()
    }
}

/// Classify an exchange by URL and resource type.
pub fn classify(site: &SiteProfile, url: &str, resource: &ResourceKind) -> Category {
    match resource {
        ResourceKind::Document if site.is_target_document(url) => Category::Document,
        ResourceKind::Script if site.is_utility_script(url) => Category::UtilityScript,
        _ => Category::Passthrough,
    }
}

/// Decide how to resolve an exchange. Pure; every exchange gets exactly one
/// disposition.
pub fn plan(site: &SiteProfile, exchange: &InterceptedExchange) -> Disposition {
    let category = classify(site, &exchange.url, &exchange.resource);
    if !exchange.is_terminal() {
        return Disposition::ContinueRequest {
            intercept_response: category != Category::Passthrough,
        };
    }
    if let (Some(reason), None) = (&exchange.error_reason, exchange.status_code) {
        return Disposition::FailRequest(reason.clone());
    }
    if category == Category::Passthrough || exchange.is_redirect() {
        return Disposition::ContinueResponse;
    }
    Disposition::Rewrite(category)
}

/// Decode a buffered body to text. `None` when it is not base64 or not
/// UTF-8; such bodies are released untouched rather than re-encoded.
pub fn decode_body(body: &ResponseBody) -> Option<String> {
    if !body.base64_encoded {
        return Some(body.body.clone());
    }
    let bytes = match STANDARD.decode(body.body.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("response body is not valid base64: {e}");
            return None;
        }
    };
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!("response body is not UTF-8: {e}");
            None
        }
    }
}

/// Encode a body for `Fetch.fulfillRequest`, which always takes base64.
pub fn encode_body(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(url: &str, resource: ResourceKind, status: Option<i64>) -> InterceptedExchange {
        InterceptedExchange {
            request_id: "r1".into(),
            url: url.into(),
            resource,
            status_code: status,
            error_reason: None,
            headers: vec![
                ("Content-Type".into(), "text/html".into()),
                ("Content-Length".into(), "120".into()),
            ],
        }
    }

    const DOC: &str = "https://weread.qq.com/web/reader/abc";
    const UTILS: &str = "https://cdn.example.com/wrwebnjlogic/js/utils.12.js";

    #[test]
    fn test_classification() {
        let site = SiteProfile::default();
        assert_eq!(classify(&site, DOC, &ResourceKind::Document), Category::Document);
        assert_eq!(classify(&site, UTILS, &ResourceKind::Script), Category::UtilityScript);
        assert_eq!(classify(&site, DOC, &ResourceKind::Script), Category::Passthrough);
        assert_eq!(
            classify(&site, "https://example.com/", &ResourceKind::Document),
            Category::Passthrough
        );
        assert_eq!(
            classify(&site, UTILS, &ResourceKind::Other("Image".into())),
            Category::Passthrough
        );
    }

    #[test]
    fn test_request_stage_plans() {
        let site = SiteProfile::default();
        assert_eq!(
            plan(&site, &exchange(DOC, ResourceKind::Document, None)),
            Disposition::ContinueRequest { intercept_response: true }
        );
        assert_eq!(
            plan(&site, &exchange("https://example.com/a.png", ResourceKind::Other("Image".into()), None)),
            Disposition::ContinueRequest { intercept_response: false }
        );
    }

    #[test]
    fn test_terminal_plans() {
        let site = SiteProfile::default();
        assert_eq!(
            plan(&site, &exchange(DOC, ResourceKind::Document, Some(200))),
            Disposition::Rewrite(Category::Document)
        );
        assert_eq!(
            plan(&site, &exchange(UTILS, ResourceKind::Script, Some(200))),
            Disposition::Rewrite(Category::UtilityScript)
        );
        for code in [301, 302, 303, 307, 308] {
            assert_eq!(
                plan(&site, &exchange(DOC, ResourceKind::Document, Some(code))),
                Disposition::ContinueResponse
            );
        }
        assert_eq!(
            plan(&site, &exchange("https://example.com/", ResourceKind::Document, Some(200))),
            Disposition::ContinueResponse
        );
    }

    #[test]
    fn test_network_error_fails_with_same_reason() {
        let site = SiteProfile::default();
        let mut ex = exchange(DOC, ResourceKind::Document, None);
        ex.error_reason = Some("ConnectionReset".into());
        assert_eq!(plan(&site, &ex), Disposition::FailRequest("ConnectionReset".into()));
    }

    #[test]
    fn test_fulfill_headers_drop_body_headers() {
        let ex = exchange(DOC, ResourceKind::Document, Some(200));
        assert_eq!(
            ex.fulfill_headers(),
            vec![("Content-Type".to_string(), "text/html".to_string())]
        );
    }

    #[test]
    fn test_body_decoding() {
        let plain = ResponseBody { body: "héllo".into(), base64_encoded: false };
        assert_eq!(decode_body(&plain).as_deref(), Some("héllo"));
        let encoded = ResponseBody { body: encode_body("héllo"), base64_encoded: true };
        assert_eq!(decode_body(&encoded).as_deref(), Some("héllo"));
    }

    #[test]
    fn test_non_utf8_body_is_not_decoded() {
        let latin1 = ResponseBody {
            body: STANDARD.encode([b'c', b'a', b'f', 0xe9]),
            base64_encoded: true,
        };
        assert_eq!(decode_body(&latin1), None);
        let garbage = ResponseBody { body: "***".into(), base64_encoded: true };
        assert_eq!(decode_body(&garbage), None);
    }
}
