//! Edge request construction
//!
//! Turns a gateway event into the request the middleware observes: absolute
//! URL from forwarded headers, cookie map, coarse geo and client IP.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use super::event::GatewayEvent;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid base64 body: {0}")]
    Body(#[from] base64::DecodeError),
}

/// Geo hints forwarded by the edge in front of the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Geo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<String>,
}

/// Header names checked for each geo field, in priority order.
const GEO_HEADERS: [(&str, &[&str]); 5] = [
    ("country", &["x-geo-country", "x-vercel-ip-country", "cf-ipcountry"]),
    ("region", &["x-geo-region", "x-vercel-ip-country-region"]),
    ("city", &["x-geo-city", "x-vercel-ip-city"]),
    ("latitude", &["x-geo-latitude", "x-vercel-ip-latitude"]),
    ("longitude", &["x-geo-longitude", "x-vercel-ip-longitude"]),
];

// == Edge Request ==
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRequest {
    pub method: String,
    pub url: Url,
    /// Lowercased header names
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub geo: Geo,
    pub ip: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl EdgeRequest {
    pub fn from_event(event: &GatewayEvent) -> Result<Self, RequestError> {
        let headers = collect_headers(event);

        let method = Some(event.http_method.as_str())
            .filter(|method| !method.is_empty())
            .or(event.request_context.http_method.as_deref())
            .unwrap_or("GET")
            .to_ascii_uppercase();

        let scheme = first_value(&headers, "x-forwarded-proto").unwrap_or("https");
        let host = first_value(&headers, "x-forwarded-host")
            .or_else(|| first_value(&headers, "host"))
            .unwrap_or("localhost");

        let target = match event.url.as_deref() {
            Some(raw) if raw.starts_with('/') => raw.to_string(),
            _ if event.path.is_empty() => "/".to_string(),
            _ => event.path.clone(),
        };
        let mut url = Url::parse(&format!("{scheme}://{host}{target}"))?;
        if url.query().is_none() {
            append_query(&mut url, event);
        }

        let cookies = headers
            .get("cookie")
            .map(|raw| parse_cookies(raw))
            .unwrap_or_default();

        let ip = first_value(&headers, "x-forwarded-for")
            .map(str::to_string)
            .or_else(|| event.request_context.identity.source_ip.clone());

        let body = match event.body.as_deref() {
            None | Some("") => None,
            Some(raw) if event.is_base64_encoded => Some(STANDARD.decode(raw)?),
            Some(raw) => Some(raw.as_bytes().to_vec()),
        };

        Ok(Self {
            method,
            url,
            geo: geo_from_headers(&headers),
            headers,
            cookies,
            ip,
            body,
        })
    }

    pub fn pathname(&self) -> &str {
        self.url.path()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.url.host_str()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Single-value headers win over their multi-value duplicates.
fn collect_headers(event: &GatewayEvent) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = event
        .multi_value_headers
        .iter()
        .map(|(name, values)| (name.to_ascii_lowercase(), values.join(", ")))
        .collect();
    for (name, value) in &event.headers {
        headers.insert(name.to_ascii_lowercase(), value.clone());
    }
    headers
}

/// First comma-separated entry of a forwarded header.
fn first_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn append_query(url: &mut Url, event: &GatewayEvent) {
    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for (name, values) in &event.multi_value_query_string_parameters {
        pairs.extend(values.iter().map(|value| (name.as_str(), value.as_str())));
    }
    for (name, value) in &event.query_string_parameters {
        if !event.multi_value_query_string_parameters.contains_key(name) {
            pairs.push((name.as_str(), value.as_str()));
        }
    }
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
}

/// Parses a `Cookie` header. The first occurrence of a name wins.
pub fn parse_cookies(raw: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for pair in raw.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        cookies
            .entry(name.to_string())
            .or_insert_with(|| value.trim().trim_matches('"').to_string());
    }
    cookies
}

fn geo_from_headers(headers: &BTreeMap<String, String>) -> Geo {
    let lookup = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| first_value(headers, name))
            .map(str::to_string)
    };
    let mut geo = Geo::default();
    for (field, names) in GEO_HEADERS {
        let value = lookup(names);
        match field {
            "country" => geo.country = value,
            "region" => geo.region = value,
            "city" => geo.city = value,
            "latitude" => geo.latitude = value,
            _ => geo.longitude = value,
        }
    }
    geo
}
