//! Wire payload and header decoding for the v1 pull protocol.

use std::collections::HashSet;

use reqwest::header::HeaderMap;

use crate::{
    LayerpullError, LayerpullResult,
    dkr::ident::{LayerId, validate_endpoint},
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Maximum number of layers a single image may be composed of.
pub const LAYERS_MAX: usize = 2048;

/// Response header carrying the session auth token; doubles as the request
/// header asking the index to issue one.
pub(crate) const TOKEN_HEADER: &str = "X-Docker-Token";

/// Response header carrying the comma-separated registry endpoint list.
pub(crate) const ENDPOINTS_HEADER: &str = "X-Docker-Endpoints";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Session-relevant fields sifted out of one response's headers.
#[derive(Debug, Default)]
pub(crate) struct WireHeaders {
    /// Replacement auth token, if the response carried one.
    pub(crate) token: Option<String>,

    /// Replacement registry endpoint list, if the response carried one.
    pub(crate) endpoints: Option<Vec<String>>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn ensure_clean_payload(payload: &[u8]) -> LayerpullResult<()> {
    if payload.is_empty() {
        return Err(LayerpullError::Protocol("empty payload".to_string()));
    }
    if payload.contains(&0) {
        return Err(LayerpullError::Protocol(
            "embedded NUL byte in payload".to_string(),
        ));
    }
    Ok(())
}

/// Decodes a tag-resolution reply of the shape `"hex-id"`.
///
/// Trailing data after the document, a non-string document and ids that do not
/// match the content-address grammar are all rejected.
pub(crate) fn parse_id(payload: &[u8]) -> LayerpullResult<LayerId> {
    ensure_clean_payload(payload)?;

    let id: String = serde_json::from_slice(payload)
        .map_err(|err| LayerpullError::Protocol(format!("malformed tag response: {err}")))?;

    id.parse()
}

/// Decodes an ancestry reply of the shape `["id1", "id2", ...]`.
///
/// The wire carries the chain tip-first; the returned list is reversed into
/// the parent-first order layers are materialized in, so the resolved image id
/// ends up as the final element.
pub(crate) fn parse_ancestry(payload: &[u8]) -> LayerpullResult<Vec<LayerId>> {
    ensure_clean_payload(payload)?;

    let raw: Vec<String> = serde_json::from_slice(payload)
        .map_err(|err| LayerpullError::Protocol(format!("malformed ancestry response: {err}")))?;

    if raw.is_empty() {
        return Err(LayerpullError::Protocol("empty ancestry".to_string()));
    }
    if raw.len() > LAYERS_MAX {
        return Err(LayerpullError::TooManyLayers { count: raw.len() });
    }

    let mut seen = HashSet::with_capacity(raw.len());
    let mut layers = Vec::with_capacity(raw.len());
    for entry in &raw {
        let layer: LayerId = entry.parse()?;
        if !seen.insert(layer.clone()) {
            return Err(LayerpullError::Protocol(format!(
                "duplicate layer id in ancestry: {}",
                layer.short()
            )));
        }
        layers.push(layer);
    }

    layers.reverse();
    Ok(layers)
}

/// Extracts the session token and registry endpoint list from response headers.
///
/// Every response is sifted; anything other than the two session headers is
/// ignored. Invalid endpoints are a fatal protocol error for the request.
pub(crate) fn sift_headers(headers: &HeaderMap) -> LayerpullResult<WireHeaders> {
    let mut wire = WireHeaders::default();

    if let Some(value) = headers.get(TOKEN_HEADER) {
        let token = value
            .to_str()
            .map_err(|_| LayerpullError::Protocol("non-ASCII token header".to_string()))?
            .trim();
        if !token.is_empty() {
            wire.token = Some(token.to_string());
        }
    }

    if let Some(value) = headers.get(ENDPOINTS_HEADER) {
        let value = value
            .to_str()
            .map_err(|_| LayerpullError::Protocol("non-ASCII endpoints header".to_string()))?;

        let mut endpoints = Vec::new();
        for endpoint in value.split(',') {
            let endpoint = endpoint.trim();
            if endpoint.is_empty() {
                continue;
            }
            validate_endpoint(endpoint)?;
            endpoints.push(endpoint.to_string());
        }
        wire.endpoints = Some(endpoints);
    }

    Ok(wire)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
