use std::collections::HashMap;

/// Parse query parameters from a URI string
///
/// Handles URL decoding (including `+` as space) and returns a HashMap of
/// parameter key-value pairs. Multiple values for the same key are not
/// supported (only the last is kept).
///
/// # Example
/// ```
/// use fitsocial::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/api/users?search=john&page=2");
/// assert_eq!(params.get("search"), Some(&"john".to_string()));
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    if let Some(query_start) = uri.find('?') {
        let query = &uri[query_start + 1..];
        for param in query.split('&').filter(|p| !p.is_empty()) {
            if let Some(eq_idx) = param.find('=') {
                let key = decode_component(&param[..eq_idx]);
                params.insert(key, decode_component(&param[eq_idx + 1..]));
            } else {
                // Flag parameter without value
                params.insert(decode_component(param), String::new());
            }
        }
    }

    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|v| v.into_owned())
        .unwrap_or(spaced)
}

/// Get a non-empty string parameter with optional default
pub fn get_string(params: &HashMap<String, String>, key: &str, default: Option<&str>) -> Option<String> {
    params
        .get(key)
        .filter(|s| !s.is_empty())
        .cloned()
        .or_else(|| default.map(|d| d.to_string()))
}

/// Get a boolean flag parameter (e.g., ?all=true)
pub fn get_bool_flag(params: &HashMap<String, String>, key: &str) -> bool {
    params.get(key).map(|v| v == "true").unwrap_or(false)
}

/// Get a positive integer parameter with validation and default
pub fn get_int(params: &HashMap<String, String>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
        .max(1)
}
