//! Entry address validation and normalization

use reqwest::Url;
use thiserror::Error;

/// Reasons an announced address is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("not a valid URL: {0}")]
    Unparseable(String),

    #[error("unsupported scheme '{scheme}' in {address}")]
    UnsupportedScheme { address: String, scheme: String },

    #[error("address has no host: {0}")]
    MissingHost(String),

    #[error("address ends with a path separator: {0}")]
    TrailingSlash(String),
}

/// Validate an announced address exactly as received
///
/// Announced addresses must already be canonical: an address ending in `/`
/// is rejected, not repaired.
pub fn validate_address(address: &str) -> Result<Url, AddressError> {
    if address.ends_with('/') {
        return Err(AddressError::TrailingSlash(address.to_string()));
    }
    parse_http_url(address)
}

/// Canonical form of a user-supplied address, as published in announcements
///
/// Parses the input, re-serializes it and strips one trailing `/`.
pub fn normalize_address(input: &str) -> Result<String, AddressError> {
    let url = parse_http_url(input.trim())?;
    let serialized = url.to_string();
    Ok(serialized
        .strip_suffix('/')
        .map(str::to_string)
        .unwrap_or(serialized))
}

/// URL of a resource below `address`, e.g. `{address}/info`
///
/// Query string and fragment of the address are preserved.
pub fn resource_url(address: &str, sub_path: &str) -> Result<Url, AddressError> {
    let mut url = parse_http_url(address)?;
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/{}", base, sub_path.trim_start_matches('/')));
    Ok(url)
}

fn parse_http_url(address: &str) -> Result<Url, AddressError> {
    let url = Url::parse(address).map_err(|e| AddressError::Unparseable(format!("{address}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(AddressError::UnsupportedScheme {
                address: address.to_string(),
                scheme: other.to_string(),
            })
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(AddressError::MissingHost(address.to_string()));
    }
    Ok(url)
}
