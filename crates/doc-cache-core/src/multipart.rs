//! Multipart body encoder for the vendor upload endpoint.
//!
//! The File API's multipart protocol expects a `multipart/related` body with
//! exactly two parts, built by hand:
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="metadata"\r\n
//! Content-Type: application/json; charset=utf-8\r\n
//! \r\n
//! {"file":{"displayName":"<name>"}}\r\n
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="file"; filename="<name>"\r\n
//! Content-Type: <mime>\r\n
//! \r\n
//! <raw bytes>
//! \r\n--<boundary>--\r\n
//! ```

use uuid::Uuid;

/// An encoded request body together with its boundary token.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    pub boundary: String,
    pub bytes: Vec<u8>,
}

impl MultipartBody {
    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/related; boundary={}", self.boundary)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Fresh random boundary token.
pub fn new_boundary() -> String {
    format!("----doc-cache-{}", Uuid::new_v4().simple())
}

/// Encode `data` with a fresh random boundary.
pub fn encode_upload(display_name: &str, mime_type: &str, data: &[u8]) -> MultipartBody {
    encode_upload_with_boundary(&new_boundary(), display_name, mime_type, data)
}

/// Encode `data` with a caller-chosen boundary.
pub fn encode_upload_with_boundary(
    boundary: &str,
    display_name: &str,
    mime_type: &str,
    data: &[u8],
) -> MultipartBody {
    let metadata = serde_json::json!({ "file": { "displayName": display_name } });

    let metadata_part = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"metadata\"\r\nContent-Type: application/json; charset=utf-8\r\n\r\n{m}\r\n",
        b = boundary,
        m = metadata,
    );
    let file_header = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: {t}\r\n\r\n",
        b = boundary,
        f = header_safe_filename(display_name),
        t = mime_type,
    );
    let closing = format!("\r\n--{}--\r\n", boundary);

    let mut bytes =
        Vec::with_capacity(metadata_part.len() + file_header.len() + data.len() + closing.len());
    bytes.extend_from_slice(metadata_part.as_bytes());
    bytes.extend_from_slice(file_header.as_bytes());
    bytes.extend_from_slice(data);
    bytes.extend_from_slice(closing.as_bytes());

    MultipartBody {
        boundary: boundary.to_string(),
        bytes,
    }
}

/// Quote-safe filename for the `Content-Disposition` header.
fn header_safe_filename(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .map(|c| if c == '"' { '\'' } else { c })
        .collect()
}
