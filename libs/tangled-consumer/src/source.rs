use url::Url;

/// A remote event stream: the firehose, a verified knot, or a verified
/// spindle.
///
/// `key` must be stable across restarts; it namespaces the stored cursor.
/// `url` builds the stream URL, encoding the resume cursor so the server
/// replays strictly after it.
pub trait Source: Send + Sync {
    fn key(&self) -> String;
    fn url(&self, cursor: Option<i64>, dev: bool) -> Url;
}
