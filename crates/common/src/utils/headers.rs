use http::{HeaderMap, HeaderName, HeaderValue};
use regex::Regex;
use std::collections::HashMap;

/// Convert HTTP headers to the wire format
/// Supports multiple values per header name
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();

    for (name, value) in headers.iter() {
        let key = name.as_str().to_string();
        let val = value.to_str().unwrap_or("").to_string();

        map.entry(key).or_default().push(val);
    }

    map
}

/// Convert the wire format back into an HTTP HeaderMap
///
/// Names are case-insensitive; invalid names or values are dropped.
pub fn map_to_headers(map: &HashMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, values) in map.iter() {
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            for value in values {
                if let Ok(header_value) = HeaderValue::from_str(value) {
                    headers.append(header_name.clone(), header_value);
                }
            }
        }
    }

    headers
}

/// Remove every header whose name matches `pattern`
///
/// Returns the names that were removed.
pub fn strip_matching_headers(
    headers: &mut HashMap<String, Vec<String>>,
    pattern: &Regex,
) -> Vec<String> {
    let mut removed = Vec::new();
    headers.retain(|name, _| {
        if pattern.is_match(name) {
            removed.push(name.clone());
            false
        } else {
            true
        }
    });
    removed
}
