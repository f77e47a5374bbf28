pub mod bytes;
pub mod http_request;
pub mod http_response;
pub mod http_stream;

use std::collections::HashMap;

pub trait GetHeaderChild {
    /// Parameters of a header value such as
    /// `form-data; name="file"; filename="a;b.mp3"`, keyed by lowercase name.
    fn get_header_child(&self) -> HashMap<String, String>;
}

impl GetHeaderChild for &str {
    fn get_header_child(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();

        for part in split_params(self) {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                params.insert(key.trim().to_ascii_lowercase(), value.to_string());
            }
        }

        params
    }
}

// `;` inside a quoted value does not start a new parameter
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_disposition_params() {
        let params = "form-data; name=\"file\"; filename=\"song.mp3\"".get_header_child();
        assert_eq!(params.get("name").map(String::as_str), Some("file"));
        assert_eq!(params.get("filename").map(String::as_str), Some("song.mp3"));
    }

    #[test]
    fn quoted_semicolon_stays_in_value() {
        let params = "form-data; Filename=\"a;b.mp3\"; name=file".get_header_child();
        assert_eq!(params.get("filename").map(String::as_str), Some("a;b.mp3"));
        assert_eq!(params.get("name").map(String::as_str), Some("file"));
    }
}
