use crate::error::MultipartError;
use crate::helpers::traits::{bytes::SplitBytes, GetHeaderChild};
use crate::{ParsedRequest, MIB};

const DEFAULT_PART_CONTENT_TYPE: &str = "application/octet-stream";
// a trailer-less remainder larger than this is assumed to be a complete file
const TRUNCATED_KEEP_LIMIT: usize = MIB;
const TRUNCATED_TAIL_DROP: usize = 4;

/// How the first boundary appeared in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryForm {
    /// `--B`
    Dashed,
    /// `B` without the leading dashes
    Bare,
    /// `\r\n--B`
    CrlfDashed,
    /// `\n--B`
    LfDashed,
}

impl BoundaryForm {
    const SEARCH_ORDER: [BoundaryForm; 4] = [
        BoundaryForm::Dashed,
        BoundaryForm::Bare,
        BoundaryForm::CrlfDashed,
        BoundaryForm::LfDashed,
    ];

    fn marker(self, boundary: &str) -> Vec<u8> {
        match self {
            BoundaryForm::Dashed => format!("--{}", boundary),
            BoundaryForm::Bare => boundary.to_string(),
            BoundaryForm::CrlfDashed => format!("\r\n--{}", boundary),
            BoundaryForm::LfDashed => format!("\n--{}", boundary),
        }
        .into_bytes()
    }
}

/// The first file field of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub filename: String,
    pub declared_content_type: String,
    pub payload: Vec<u8>,
    pub boundary_form: BoundaryForm,
}

pub trait RequestUtils {
    /// Boundary token from a `multipart/form-data` `Content-Type` header.
    fn get_boundary(&self) -> Result<String, MultipartError>;
    fn get_multi_part(&self) -> Result<MultipartPart, MultipartError>;
}

impl RequestUtils for ParsedRequest {
    fn get_boundary(&self) -> Result<String, MultipartError> {
        let content_type = self.header("Content-Type").ok_or(MultipartError::NotMultipart)?;
        if !content_type
            .to_ascii_lowercase()
            .contains("multipart/form-data")
        {
            return Err(MultipartError::NotMultipart);
        }

        let boundary = content_type
            .get_header_child()
            .remove("boundary")
            .unwrap_or_default();
        if boundary.is_empty() {
            return Err(MultipartError::MissingBoundary);
        }
        Ok(boundary)
    }

    fn get_multi_part(&self) -> Result<MultipartPart, MultipartError> {
        let boundary = self.get_boundary()?;
        extract_multipart(&self.body, &boundary)
    }
}

/// Extracts the first part of `body`.
///
/// The payload ends at the final delimiter `--B--` when present, else at the
/// next `\r\n--B`. Without either, the body is treated as truncated: a
/// remainder over 1 MiB is cut to its first 1 MiB, a shorter one loses its
/// last 4 bytes.
pub fn extract_multipart(body: &[u8], boundary: &str) -> Result<MultipartPart, MultipartError> {
    let (boundary_form, position) =
        locate_first_boundary(body, boundary).ok_or(MultipartError::BoundaryNotFound)?;
    let headers_start = position + boundary_form.marker(boundary).len();
    let separator = body
        .find_bytes_from(b"\r\n\r\n", headers_start)
        .ok_or(MultipartError::MissingHeaderSeparator)?;

    let part_headers = String::from_utf8_lossy(&body[headers_start..separator]);
    let (filename, declared_content_type) = parse_part_headers(&part_headers)?;

    let payload = payload_slice(&body[separator + 4..], boundary);
    tracing::debug!(
        %filename,
        content_type = %declared_content_type,
        payload = payload.len(),
        form = ?boundary_form,
        "multipart part extracted"
    );

    Ok(MultipartPart {
        filename,
        declared_content_type,
        payload: payload.to_vec(),
        boundary_form,
    })
}

// Earliest match wins; on equal positions the search order decides.
fn locate_first_boundary(body: &[u8], boundary: &str) -> Option<(BoundaryForm, usize)> {
    BoundaryForm::SEARCH_ORDER
        .iter()
        .filter_map(|form| body.find_bytes(&form.marker(boundary)).map(|pos| (*form, pos)))
        .min_by_key(|(_, pos)| *pos)
}

fn parse_part_headers(headers: &str) -> Result<(String, String), MultipartError> {
    let mut filename = None;
    let mut content_type = None;

    for line in headers.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("Content-Disposition") {
            filename = value.trim().get_header_child().remove("filename");
        } else if key.eq_ignore_ascii_case("Content-Type") {
            content_type = Some(value.trim().to_string());
        }
    }

    let filename = filename
        .filter(|name| !name.is_empty())
        .ok_or(MultipartError::MissingFilename)?;
    let content_type = content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| DEFAULT_PART_CONTENT_TYPE.to_string());
    Ok((filename, content_type))
}

fn payload_slice<'a>(rest: &'a [u8], boundary: &str) -> &'a [u8] {
    let final_marker = format!("--{}--", boundary);
    let next_marker = format!("\r\n--{}", boundary);

    if let Some(end) = rest.find_bytes(final_marker.as_bytes()) {
        return strip_line_break(&rest[..end]);
    }
    if let Some(end) = rest.find_bytes(next_marker.as_bytes()) {
        return &rest[..end];
    }

    if rest.len() > TRUNCATED_KEEP_LIMIT {
        tracing::warn!(
            remaining = rest.len(),
            kept = TRUNCATED_KEEP_LIMIT,
            "closing boundary not found, keeping the leading part only"
        );
        &rest[..TRUNCATED_KEEP_LIMIT]
    } else {
        tracing::warn!(
            remaining = rest.len(),
            "closing boundary not found, dropping trailing bytes"
        );
        &rest[..rest.len().saturating_sub(TRUNCATED_TAIL_DROP)]
    }
}

// the line break before a delimiter belongs to the delimiter
fn strip_line_break(payload: &[u8]) -> &[u8] {
    payload
        .strip_suffix(b"\r\n")
        .or_else(|| payload.strip_suffix(b"\n"))
        .unwrap_or(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD: &str =
        "\r\nContent-Disposition: form-data; name=\"file\"; filename=\"song.mp3\"\r\nContent-Type: audio/mpeg\r\n\r\n";

    fn payload() -> Vec<u8> {
        let mut data = b"ID3\x04\x00".to_vec();
        data.extend((0..4096u32).map(|i| (i * 7 % 256) as u8));
        data
    }

    fn body_with_prefix(prefix: &str) -> Vec<u8> {
        let mut body = prefix.as_bytes().to_vec();
        body.extend_from_slice(HEAD.as_bytes());
        body.extend_from_slice(&payload());
        body.extend_from_slice(b"\r\n--X1--\r\n");
        body
    }

    fn request(content_type: Option<&str>, body: Vec<u8>) -> ParsedRequest {
        let mut request = ParsedRequest::fallback(body);
        request.method = http::Method::POST;
        if let Some(ct) = content_type {
            request.headers.insert("Content-Type".into(), ct.into());
        }
        request
    }

    #[test]
    fn extracts_single_part() {
        let part = extract_multipart(&body_with_prefix("--X1"), "X1").unwrap();
        assert_eq!(part.filename, "song.mp3");
        assert_eq!(part.declared_content_type, "audio/mpeg");
        assert_eq!(part.payload, payload());
        assert_eq!(part.boundary_form, BoundaryForm::Dashed);
    }

    #[test]
    fn all_boundary_prefixes_give_the_same_part() {
        let cases = [
            ("--X1", BoundaryForm::Dashed),
            ("X1", BoundaryForm::Bare),
            ("\r\n--X1", BoundaryForm::CrlfDashed),
            ("\n--X1", BoundaryForm::LfDashed),
        ];
        for (prefix, form) in cases {
            let part = extract_multipart(&body_with_prefix(prefix), "X1").unwrap();
            assert_eq!(part.filename, "song.mp3", "prefix {:?}", prefix);
            assert_eq!(part.declared_content_type, "audio/mpeg");
            assert_eq!(part.payload, payload(), "prefix {:?}", prefix);
            assert_eq!(part.boundary_form, form);
        }
    }

    #[test]
    fn next_boundary_ends_payload_without_final_marker() {
        let mut body = body_with_prefix("--X1");
        body.truncate(body.len() - b"\r\n--X1--\r\n".len());
        body.extend_from_slice(b"\r\n--X1\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\nv");

        let part = extract_multipart(&body, "X1").unwrap();
        assert_eq!(part.payload, payload());
    }

    #[test]
    fn missing_trailer_drops_last_four_bytes() {
        let mut body = b"--X1".to_vec();
        body.extend_from_slice(HEAD.as_bytes());
        body.extend_from_slice(&payload());

        let part = extract_multipart(&body, "X1").unwrap();
        let expected = payload();
        assert_eq!(part.payload, &expected[..expected.len() - 4]);
    }

    #[test]
    fn missing_trailer_on_large_remainder_keeps_first_mib() {
        let mut body = b"--X1".to_vec();
        body.extend_from_slice(HEAD.as_bytes());
        let big: Vec<u8> = (0..(MIB + 5000)).map(|i| (i % 253) as u8).collect();
        body.extend_from_slice(&big);

        let part = extract_multipart(&body, "X1").unwrap();
        assert_eq!(part.payload.len(), MIB);
        assert_eq!(part.payload, &big[..MIB]);
    }

    #[test]
    fn content_type_defaults_to_octet_stream() {
        let body = b"--X1\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.flac\"\r\n\r\nabc\r\n--X1--\r\n";
        let part = extract_multipart(body, "X1").unwrap();
        assert_eq!(part.declared_content_type, "application/octet-stream");
        assert_eq!(part.payload, b"abc");
    }

    #[test]
    fn rejects_incomplete_parts() {
        assert_eq!(
            extract_multipart(b"nothing here", "X1").unwrap_err(),
            MultipartError::BoundaryNotFound
        );
        assert_eq!(
            extract_multipart(b"--X1\r\nContent-Disposition: form-data; filename=\"a\"", "X1")
                .unwrap_err(),
            MultipartError::MissingHeaderSeparator
        );
        assert_eq!(
            extract_multipart(b"--X1\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nabc\r\n--X1--", "X1")
                .unwrap_err(),
            MultipartError::MissingFilename
        );
        assert_eq!(
            extract_multipart(b"--X1\r\nContent-Disposition: form-data; name=\"file\"; filename=\"\"\r\n\r\n\r\n--X1--", "X1")
                .unwrap_err(),
            MultipartError::MissingFilename
        );
    }

    #[test]
    fn binary_payload_survives() {
        let mut body = b"--X1\r\nContent-Disposition: form-data; name=\"file\"; filename=\"b.wav\"\r\n\r\n".to_vec();
        let data: Vec<u8> = vec![0x00, 0xff, b'\r', b'\n', b'-', b'-', 0x80, 0x0d];
        body.extend_from_slice(&data);
        body.extend_from_slice(b"\r\n--X1--\r\n");

        let part = extract_multipart(&body, "X1").unwrap();
        assert_eq!(part.payload, data);
    }

    #[test]
    fn boundary_from_content_type() {
        let req = request(
            Some("multipart/form-data; boundary=----WebKitFormBoundaryabc"),
            Vec::new(),
        );
        assert_eq!(req.get_boundary().unwrap(), "----WebKitFormBoundaryabc");

        let req = request(
            Some("Multipart/Form-Data; boundary=\"quoted\"; charset=utf-8"),
            Vec::new(),
        );
        assert_eq!(req.get_boundary().unwrap(), "quoted");
    }

    #[test]
    fn boundary_errors() {
        let req = request(Some("text/plain"), Vec::new());
        assert_eq!(req.get_boundary().unwrap_err(), MultipartError::NotMultipart);
        assert_eq!(
            req.get_multi_part().unwrap_err().to_string(),
            "need multipart/form-data request"
        );

        let req = request(None, Vec::new());
        assert_eq!(req.get_boundary().unwrap_err(), MultipartError::NotMultipart);

        let req = request(Some("multipart/form-data"), Vec::new());
        assert_eq!(req.get_boundary().unwrap_err(), MultipartError::MissingBoundary);

        let req = request(Some("multipart/form-data; boundary="), Vec::new());
        assert_eq!(req.get_boundary().unwrap_err(), MultipartError::MissingBoundary);
    }

    #[test]
    fn get_multi_part_from_request() {
        let req = request(Some("multipart/form-data; boundary=X1"), body_with_prefix("--X1"));
        let part = req.get_multi_part().unwrap();
        assert_eq!(part.filename, "song.mp3");
        assert_eq!(part.payload, payload());
    }
}
