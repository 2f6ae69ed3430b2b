//! URL utilities for consistent URL handling
//!
//! Service base URLs come from configuration and may or may not carry a
//! trailing slash; these helpers join them with endpoint paths.

/// Normalize a base URL by removing trailing slashes
///
/// This ensures consistent URL construction when appending endpoints,
/// preventing double slashes in the final URLs.
///
/// # Examples
///
/// ```
/// use patient_chat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://relay.local:5268"), "http://relay.local:5268");
/// assert_eq!(normalize_base_url("http://relay.local:5268/"), "http://relay.local:5268");
/// assert_eq!(normalize_base_url("http://relay.local:5268///"), "http://relay.local:5268");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Construct a complete API endpoint URL from a base URL and endpoint path
///
/// This function normalizes the base URL and safely appends the endpoint,
/// ensuring there are no double slashes in the result.
///
/// # Examples
///
/// ```
/// use patient_chat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://relay.local:5268", "api/patient/query"),
///     "http://relay.local:5268/api/patient/query"
/// );
/// assert_eq!(
///     construct_api_url("http://relay.local:5268/", "api/patient/query"),
///     "http://relay.local:5268/api/patient/query"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Join `endpoint` onto `base_url` and append `id` as a single,
/// percent-encoded path segment.
///
/// # Examples
///
/// ```
/// use patient_chat::utils::url::construct_resource_url;
///
/// let url = construct_resource_url("http://localhost:5000/", "image-url", "p 1").unwrap();
/// assert_eq!(url.as_str(), "http://localhost:5000/image-url/p%201");
/// ```
pub fn construct_resource_url(base_url: &str, endpoint: &str, id: &str) -> Option<reqwest::Url> {
    let mut url = reqwest::Url::parse(&construct_api_url(base_url, endpoint)).ok()?;
    url.path_segments_mut().ok()?.pop_if_empty().push(id);
    Some(url)
}
