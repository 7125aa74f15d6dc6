use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use crate::errors::SubmitError;
use crate::payload::SessionPayload;

/// Upper bound on one submission round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix bare `host:port` endpoints with a scheme.
fn endpoint_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

/// Serialize `payload` and POST it to `endpoint` in a single attempt.
///
/// Returns the response status joined with the response body. Any transport
/// or serialization failure surfaces as [`SubmitError`] for the caller to
/// fold into the session outcome; nothing here retries.
pub fn submit(payload: &SessionPayload, endpoint: &str) -> Result<String, SubmitError> {
    let url = endpoint_url(endpoint);
    let body = serde_json::to_string(payload)?;
    debug!("submitting {} bytes to {url}", body.len());

    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let response = client
        .post(&url)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()?;

    let status = response.status();
    let text = response
        .text()
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
    info!("submission answered with {status}");
    Ok(format!("{status} {}", text.trim()))
}
