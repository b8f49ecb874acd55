//! Minimal `multipart/form-data` parser for asserting on captured uploads.

/// One part of a parsed multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Part {
    /// The part body as UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Parse `body` using the boundary named in `content_type`.
pub fn parse_multipart(content_type: &str, body: &[u8]) -> Result<Vec<Part>, String> {
    let (mime, params) = content_type
        .split_once(';')
        .ok_or_else(|| format!("no boundary in {content_type:?}"))?;
    if mime.trim() != "multipart/form-data" {
        return Err(format!("not multipart/form-data: {mime:?}"));
    }
    let boundary = params
        .trim()
        .strip_prefix("boundary=")
        .ok_or_else(|| format!("no boundary in {content_type:?}"))?;

    let delimiter = format!("--{boundary}");
    let next_delimiter = format!("\r\n--{boundary}");

    let mut rest = body
        .strip_prefix(delimiter.as_bytes())
        .ok_or("body does not start with the boundary")?;
    let mut parts = Vec::new();

    loop {
        if rest.starts_with(b"--") {
            if rest != b"--\r\n" {
                return Err("trailing bytes after closing boundary".to_string());
            }
            return Ok(parts);
        }
        rest = rest
            .strip_prefix(b"\r\n")
            .ok_or("missing CRLF after boundary")?;

        let header_end = find(rest, b"\r\n\r\n").ok_or("unterminated part headers")?;
        let headers = std::str::from_utf8(&rest[..header_end])
            .map_err(|e| format!("part headers are not UTF-8: {e}"))?;
        rest = &rest[header_end + 4..];

        let data_end = find(rest, next_delimiter.as_bytes()).ok_or("unterminated part")?;
        let mut part = parse_headers(headers)?;
        part.data = rest[..data_end].to_vec();
        parts.push(part);

        rest = &rest[data_end + next_delimiter.len()..];
    }
}

fn parse_headers(headers: &str) -> Result<Part, String> {
    let mut part = Part {
        name: String::new(),
        filename: None,
        content_type: None,
        data: Vec::new(),
    };
    let mut saw_disposition = false;

    for line in headers.split("\r\n") {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| format!("malformed header {line:?}"))?;
        match key.trim().to_ascii_lowercase().as_str() {
            "content-disposition" => {
                saw_disposition = true;
                part.name = quoted_param(value, "name")
                    .ok_or_else(|| format!("part without name: {value:?}"))?;
                part.filename = quoted_param(value, "filename");
            }
            "content-type" => part.content_type = Some(value.trim().to_string()),
            _ => {}
        }
    }

    if !saw_disposition {
        return Err("part without Content-Disposition".to_string());
    }
    Ok(part)
}

/// Extract `key="..."` from a header value, undoing backslash escapes.
fn quoted_param(value: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=\"");
    let mut search = value;
    let start = loop {
        let idx = search.find(&needle)?;
        let preceded_ok = idx == 0 || matches!(search.as_bytes()[idx - 1], b' ' | b';');
        if preceded_ok {
            break value.len() - search.len() + idx + needle.len();
        }
        search = &search[idx + needle.len()..];
    };

    let mut out = String::new();
    let mut chars = value[start..].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?),
            '"' => return Some(out),
            c => out.push(c),
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
