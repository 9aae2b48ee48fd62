use super::HttpError;
use httparse::Status;
use std::io::{self, Read, Write};

const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Request line and headers of an inbound HTTP/1.1 request.
///
/// The body is deliberately not part of this type: message bodies are
/// read through a bounded [`BodyReader`] and snapshot bodies are streamed
/// straight to storage without ever being buffered here.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parses `Content-Length`. Absent and unparsable are distinct: POST
    /// handlers require a declared length, while GET stream requests carry
    /// none.
    pub fn content_length(&self) -> Result<Option<u64>, HttpError> {
        match self.header("content-length") {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| HttpError::InvalidContentLength),
        }
    }
}

/// Parses the head of a blocking HTTP/1.1 request from `stream`.
///
/// Returns the head together with any body bytes that were pulled off the
/// socket while hunting for the header terminator; callers feed those into
/// a [`BodyReader`]. Header size is capped; requests without a declared
/// body length are rejected later, when the body is read.
pub fn read_request_head(stream: &mut dyn Read) -> Result<(RequestHead, Vec<u8>), HttpError> {
    let mut buffer = Vec::new();
    let mut temp = [0u8; 1024];
    let header_len = loop {
        let read = stream.read(&mut temp).map_err(HttpError::Io)?;
        if read == 0 {
            return Err(HttpError::ConnectionClosedBeforeHeaders);
        }
        buffer.extend_from_slice(&temp[..read]);
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(HttpError::HeadersTooLarge);
        }
        if let Some(pos) = find_header_terminator(&buffer) {
            break pos + 4;
        }
    };
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(&buffer[..header_len]) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) => return Err(HttpError::PartialRequest),
        Err(err) => return Err(HttpError::RequestParse(err)),
    }
    let method = request.method.ok_or(HttpError::MissingMethod)?.to_string();
    let raw_path = request.path.ok_or(HttpError::MissingPath)?;
    let path = match raw_path.find('?') {
        Some(idx) => raw_path[..idx].to_string(),
        None => raw_path.to_string(),
    };
    let mut header_pairs = Vec::with_capacity(request.headers.len());
    for header in request.headers.iter() {
        let value =
            String::from_utf8(header.value.to_vec()).map_err(|_| HttpError::InvalidHeaderValue {
                name: header.name.to_string(),
            })?;
        header_pairs.push((header.name.to_string(), value));
    }
    let leftover = buffer.split_off(header_len);
    Ok((
        RequestHead {
            method,
            path,
            headers: header_pairs,
        },
        leftover,
    ))
}

fn find_header_terminator(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Serves exactly the declared number of body bytes: first whatever the
/// head parser over-read, then the socket. Reports EOF once the declared
/// length is consumed, so downstream readers cannot run past the request
/// body.
pub struct BodyReader<'a> {
    leftover: Vec<u8>,
    leftover_pos: usize,
    stream: &'a mut dyn Read,
    remaining: u64,
}

impl<'a> BodyReader<'a> {
    pub fn new(leftover: Vec<u8>, stream: &'a mut dyn Read, declared: u64) -> Self {
        Self {
            leftover,
            leftover_pos: 0,
            stream,
            remaining: declared,
        }
    }

    /// Drains the remaining declared bytes into `buf`, failing on a short
    /// body.
    pub fn read_to_vec(&mut self, buf: &mut Vec<u8>) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        loop {
            let read = self.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..read]);
        }
        Ok(())
    }

    /// Reads and discards up to `cap` unconsumed body bytes, so the remote
    /// can finish writing its request and observe the response instead of
    /// a connection reset. Read failures end the drain silently.
    pub fn discard(&mut self, cap: u64) {
        let mut chunk = [0u8; 4096];
        let mut left = cap.min(self.remaining);
        while left > 0 {
            let want = chunk.len().min(left as usize);
            match self.read(&mut chunk[..want]) {
                Ok(0) | Err(_) => break,
                Ok(read) => left -= read as u64,
            }
        }
    }
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        if self.leftover_pos < self.leftover.len() {
            let available = &self.leftover[self.leftover_pos..];
            let take = want.min(available.len());
            buf[..take].copy_from_slice(&available[..take]);
            self.leftover_pos += take;
            self.remaining -= take as u64;
            return Ok(take);
        }
        let read = self.stream.read(&mut buf[..want])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request body completed",
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

/// Writes a complete plain-text response; the caller closes the
/// connection afterwards.
pub fn write_response(
    w: &mut dyn Write,
    status: u16,
    extra_headers: &[(&str, String)],
    body: &str,
) -> io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", status, status_text(status));
    for (name, value) in extra_headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if status == 204 {
        head.push_str("Connection: close\r\n\r\n");
        w.write_all(head.as_bytes())?;
    } else {
        head.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        head.push_str(&format!("Content-Length: {}\r\n", body.len() + 1));
        head.push_str("Connection: close\r\n\r\n");
        w.write_all(head.as_bytes())?;
        w.write_all(body.as_bytes())?;
        w.write_all(b"\n")?;
    }
    w.flush()
}

/// Writes the head of an accepted stream response and flushes it so the
/// remote observes a healthy stream before any frame is sent. No
/// `Content-Length`, no `Connection: close`: the body is the stream.
pub fn write_stream_accept(w: &mut dyn Write, extra_headers: &[(&str, String)]) -> io::Result<()> {
    let mut head = String::from("HTTP/1.1 200 OK\r\n");
    for (name, value) in extra_headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    w.write_all(head.as_bytes())?;
    w.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        410 => "Gone",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}
