//! Probe payloads and reply classification (spec.md §4.A, §4.D, §6).
//!
//! Building the bytes to send and deciding whether a reply counts as OK are
//! pure functions — no sockets involved — so they're fully covered by unit
//! tests without a runtime.

use bytes::{BufMut, Bytes, BytesMut};

/// Which application-level exchange a proxy performs on top of the TCP
/// connect, if any.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProbeKind {
    /// Plain TCP: connectivity alone is the probe.
    Tcp,
    Http,
    Ssl3,
    Smtp,
}

/// A pre-built probe payload, created once per proxy from its configured
/// bytes (`check_req`/`check_len` in the original).
#[derive(Clone, Debug)]
pub struct Probe {
    kind: ProbeKind,
    template: Bytes,
}

impl Probe {
    pub fn tcp() -> Self {
        Self {
            kind: ProbeKind::Tcp,
            template: Bytes::new(),
        }
    }

    pub fn http(request: impl Into<Bytes>) -> Self {
        Self {
            kind: ProbeKind::Http,
            template: request.into(),
        }
    }

    pub fn smtp(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: ProbeKind::Smtp,
            template: bytes.into(),
        }
    }

    /// A minimal SSLv3 CLIENT_HELLO template. Bytes `[11..14]` are the
    /// `gmt_unix_time` field and are overwritten by [`Probe::render`] on
    /// every send so replays look fresh (spec.md §4.A, §6).
    pub fn ssl3(template: impl Into<Bytes>) -> Self {
        let template = template.into();
        assert!(
            template.len() >= 15,
            "SSLv3 CLIENT_HELLO template must be at least 15 bytes (gmt_unix_time at [11..14])"
        );
        Self {
            kind: ProbeKind::Ssl3,
            template,
        }
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn is_tcp_only(&self) -> bool {
        matches!(self.kind, ProbeKind::Tcp)
    }

    /// Produces the exact bytes to send for one probe attempt. For SSLv3,
    /// stamps the current Unix time (seconds, network byte order) into
    /// bytes `[11..14]`; all other kinds return the fixed template as-is.
    pub fn render(&self, unix_time_secs: u32) -> Bytes {
        match self.kind {
            ProbeKind::Ssl3 => {
                let mut buf = BytesMut::from(&self.template[..]);
                buf[11..15].copy_from_slice(&unix_time_secs.to_be_bytes());
                buf.freeze()
            }
            _ => self.template.clone(),
        }
    }

    /// Classifies a reply buffer per spec.md §4.D / §6. `Some(true)` = OK,
    /// `Some(false)` = FAIL, and there is no "keep waiting" outcome here —
    /// the caller only invokes this once a full (possibly short) read has
    /// already happened; `EAGAIN` is handled upstream in `handlers`.
    pub fn classify(&self, reply: &[u8]) -> bool {
        match self.kind {
            ProbeKind::Tcp => true,
            ProbeKind::Http => {
                reply.len() >= 12
                    && reply.starts_with(b"HTTP/1.")
                    && matches!(reply.get(9), Some(b'2') | Some(b'3'))
            }
            ProbeKind::Ssl3 => reply.len() >= 5 && matches!(reply[0], 0x15 | 0x16),
            ProbeKind::Smtp => reply.len() >= 3 && reply[0] == b'2',
        }
    }
}

/// Builds the conventional `OPTIONS / HTTP/1.0` probe bytes used when a
/// proxy doesn't supply a custom `check_req`.
pub fn default_http_request() -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_slice(b"OPTIONS / HTTP/1.0\r\n\r\n");
    buf.freeze()
}

/// Builds the conventional SMTP `QUIT` probe bytes.
pub fn default_smtp_request() -> Bytes {
    Bytes::from_static(b"QUIT\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_ok_on_2xx_and_3xx() {
        let p = Probe::http(default_http_request());
        assert!(p.classify(b"HTTP/1.0 200 OK\r\n"));
        assert!(p.classify(b"HTTP/1.1 304 Not Modified\r\n"));
    }

    #[test]
    fn http_fail_on_5xx_and_short_reads() {
        let p = Probe::http(default_http_request());
        assert!(!p.classify(b"HTTP/1.1 503 Service Unavailable"));
        assert!(!p.classify(b"HTTP/1.0 4"));
        assert!(!p.classify(b""));
        assert!(!p.classify(b"not even http"));
    }

    #[test]
    fn ssl3_ok_on_alert_or_handshake_record() {
        let template = vec![0u8; 20];
        let p = Probe::ssl3(template);
        assert!(p.classify(&[0x15, 0, 0, 0, 0]));
        assert!(p.classify(&[0x16, 0, 0, 0, 0]));
        assert!(!p.classify(&[0x17, 0, 0, 0, 0]));
        assert!(!p.classify(&[0x15, 0, 0, 0]));
    }

    #[test]
    fn ssl3_render_stamps_unix_time_network_order() {
        let template = vec![0u8; 20];
        let p = Probe::ssl3(template);
        let rendered = p.render(0x01020304);
        assert_eq!(&rendered[11..15], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn smtp_ok_on_2xx() {
        let p = Probe::smtp(default_smtp_request());
        assert!(p.classify(b"250 OK"));
        assert!(!p.classify(b"550 no"));
        assert!(!p.classify(b"2"));
    }

    #[test]
    fn tcp_probe_always_ok() {
        let p = Probe::tcp();
        assert!(p.classify(b""));
    }

    #[test]
    fn classification_is_idempotent() {
        let p = Probe::http(default_http_request());
        let reply = b"HTTP/1.0 200 OK\r\n";
        assert_eq!(p.classify(reply), p.classify(reply));
    }
}
