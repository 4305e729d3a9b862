//! Outcome interpretation
//!
//! Maps the response a middleware produced onto what the gateway should do:
//! pass through, rewrite, redirect or answer directly.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

use super::event::GatewayResponse;
use super::executor::ScriptResponse;

pub const NEXT_HEADER: &str = "x-middleware-next";
pub const REWRITE_HEADER: &str = "x-middleware-rewrite";
pub const OVERRIDE_HEADERS: &str = "x-middleware-override-headers";
pub const REQUEST_HEADER_PREFIX: &str = "x-middleware-request-";
const INTERNAL_PREFIX: &str = "x-middleware-";

/// Effects carried into normal handling on continue and rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Passthrough {
    /// Complete replacement request header set, when the middleware overrode it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<BTreeMap<String, String>>,
    /// Headers to add to the final response
    pub response_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareOutcome {
    /// Middleware absent, not matched, or failed open
    None,
    Continue(Passthrough),
    Rewrite {
        url: String,
        passthrough: Passthrough,
    },
    Redirect(GatewayResponse),
    Response(GatewayResponse),
}

impl MiddlewareOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            MiddlewareOutcome::None => "none",
            MiddlewareOutcome::Continue(_) => "continue",
            MiddlewareOutcome::Rewrite { .. } => "rewrite",
            MiddlewareOutcome::Redirect(_) => "redirect",
            MiddlewareOutcome::Response(_) => "response",
        }
    }

    /// Response the gateway returns directly, if any.
    pub fn response(&self) -> Option<&GatewayResponse> {
        match self {
            MiddlewareOutcome::Redirect(response) | MiddlewareOutcome::Response(response) => {
                Some(response)
            }
            _ => None,
        }
    }
}

pub fn interpret(response: ScriptResponse) -> MiddlewareOutcome {
    if let Some(target) = response.header(REWRITE_HEADER) {
        return MiddlewareOutcome::Rewrite {
            url: target.to_string(),
            passthrough: passthrough(&response),
        };
    }
    if response.header(NEXT_HEADER).is_some() {
        return MiddlewareOutcome::Continue(passthrough(&response));
    }

    let is_redirect = (300..400).contains(&response.status);
    let gateway = to_gateway_response(response);
    if is_redirect && gateway.header("location").is_some() {
        MiddlewareOutcome::Redirect(gateway)
    } else {
        MiddlewareOutcome::Response(gateway)
    }
}

fn is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}

fn passthrough(response: &ScriptResponse) -> Passthrough {
    let request_headers = response.header(OVERRIDE_HEADERS).map(|names| {
        names
            .split(',')
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .filter_map(|name| {
                let value = response.header(&format!("{REQUEST_HEADER_PREFIX}{name}"))?;
                Some((name, value.to_string()))
            })
            .collect()
    });

    let response_headers = response
        .headers
        .iter()
        .filter(|(name, _)| !is_internal(name) && name != "content-length")
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Passthrough {
        request_headers,
        response_headers,
    }
}

/// Repeated headers go to `multiValueHeaders`; non UTF-8 bodies are base64.
fn to_gateway_response(response: ScriptResponse) -> GatewayResponse {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in response.headers {
        if !is_internal(&name) {
            grouped.entry(name).or_default().push(value);
        }
    }

    let mut headers = BTreeMap::new();
    let mut multi_value_headers = BTreeMap::new();
    for (name, mut values) in grouped {
        if values.len() == 1 {
            headers.insert(name, values.remove(0));
        } else {
            multi_value_headers.insert(name, values);
        }
    }

    let (body, is_base64_encoded) = match response.body {
        None => (String::new(), false),
        Some(bytes) => match String::from_utf8(bytes) {
            Ok(text) => (text, false),
            Err(err) => (STANDARD.encode(err.into_bytes()), true),
        },
    };

    GatewayResponse {
        status_code: response.status,
        headers,
        multi_value_headers,
        body,
        is_base64_encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_marker_continues() {
        let response = ScriptResponse::new(200)
            .with_header(NEXT_HEADER, "1")
            .with_header("x-frame-options", "DENY");

        let MiddlewareOutcome::Continue(passthrough) = interpret(response) else {
            panic!("expected continue");
        };
        assert!(passthrough.request_headers.is_none());
        assert_eq!(passthrough.response_headers.len(), 1);
        assert_eq!(passthrough.response_headers["x-frame-options"], "DENY");
    }

    #[test]
    fn test_rewrite_marker() {
        let response = ScriptResponse::new(200)
            .with_header(REWRITE_HEADER, "https://shop.example.com/en/home")
            .with_header(OVERRIDE_HEADERS, "x-user, Authorization")
            .with_header("x-middleware-request-x-user", "42")
            .with_header("x-middleware-request-authorization", "Bearer t");

        let outcome = interpret(response);
        assert_eq!(outcome.kind(), "rewrite");
        let MiddlewareOutcome::Rewrite { url, passthrough } = outcome else {
            unreachable!();
        };
        assert_eq!(url, "https://shop.example.com/en/home");
        let overrides = passthrough.request_headers.unwrap();
        assert_eq!(overrides["x-user"], "42");
        assert_eq!(overrides["authorization"], "Bearer t");
        assert!(passthrough.response_headers.is_empty());
    }

    #[test]
    fn test_redirect_keeps_status_and_location() {
        let response = ScriptResponse::new(307).with_header("Location", "/login");

        let outcome = interpret(response);
        let MiddlewareOutcome::Redirect(gateway) = &outcome else {
            panic!("expected redirect, got {outcome:?}");
        };
        assert_eq!(gateway.status_code, 307);
        assert_eq!(gateway.headers["location"], "/login");
        assert!(outcome.response().is_some());
    }

    #[test]
    fn test_3xx_without_location_is_a_response() {
        let outcome = interpret(ScriptResponse::new(304));
        assert_eq!(outcome.kind(), "response");
    }

    #[test]
    fn test_response_body_encoding() {
        let text = interpret(
            ScriptResponse::new(403)
                .with_header("content-type", "text/plain")
                .with_body("denied"),
        );
        let gateway = text.response().unwrap();
        assert_eq!(gateway.body, "denied");
        assert!(!gateway.is_base64_encoded);

        let binary = interpret(ScriptResponse::new(200).with_body(vec![0xff, 0x00, 0xfe]));
        let gateway = binary.response().unwrap();
        assert_eq!(gateway.body, "/wD+");
        assert!(gateway.is_base64_encoded);
    }

    #[test]
    fn test_repeated_headers_are_multi_value() {
        let outcome = interpret(
            ScriptResponse::new(200)
                .with_header("set-cookie", "a=1")
                .with_header("set-cookie", "b=2")
                .with_header("content-type", "text/html"),
        );

        let gateway = outcome.response().unwrap();
        assert_eq!(gateway.multi_value_headers["set-cookie"], vec!["a=1", "b=2"]);
        assert!(!gateway.headers.contains_key("set-cookie"));
        assert_eq!(gateway.headers["content-type"], "text/html");
    }
}
