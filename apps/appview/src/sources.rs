//! Concrete event sources: the jetstream firehose plus one stream per
//! verified knot and spindle. Cursor namespaces (`key()`) are stable
//! across restarts. Endpoint URLs are validated at construction so
//! `Source::url` stays infallible.

use tangled_consumer::Source;
use url::Url;

/// The ATProto firehose, filtered to tangled collections server-side.
pub struct JetstreamSource {
    endpoint: Url,
}

impl JetstreamSource {
    pub fn new(endpoint: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
        })
    }
}

impl Source for JetstreamSource {
    fn key(&self) -> String {
        "firehose".to_owned()
    }

    fn url(&self, cursor: Option<i64>, _dev: bool) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(cursor) = cursor {
            // jetstream resumes strictly after the given microsecond cursor
            url.query_pairs_mut()
                .append_pair("cursor", &(cursor / 1_000).to_string());
        }
        url
    }
}

/// A verified knot's or spindle's event stream.
struct NodeStream {
    domain: String,
    ws: Url,
    wss: Url,
}

impl NodeStream {
    fn new(domain: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            domain: domain.to_owned(),
            ws: Url::parse(&format!("ws://{domain}/events"))?,
            wss: Url::parse(&format!("wss://{domain}/events"))?,
        })
    }

    fn url(&self, cursor: Option<i64>, dev: bool) -> Url {
        let mut url = if dev { self.ws.clone() } else { self.wss.clone() };
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", &cursor.to_string());
        }
        url
    }
}

pub struct KnotSource {
    stream: NodeStream,
}

impl KnotSource {
    pub fn new(domain: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            stream: NodeStream::new(domain)?,
        })
    }
}

impl Source for KnotSource {
    fn key(&self) -> String {
        format!("knot:{}", self.stream.domain)
    }

    fn url(&self, cursor: Option<i64>, dev: bool) -> Url {
        self.stream.url(cursor, dev)
    }
}

pub struct SpindleSource {
    stream: NodeStream,
}

impl SpindleSource {
    pub fn new(domain: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            stream: NodeStream::new(domain)?,
        })
    }
}

impl Source for SpindleSource {
    fn key(&self) -> String {
        format!("spindle:{}", self.stream.domain)
    }

    fn url(&self, cursor: Option<i64>, dev: bool) -> Url {
        self.stream.url(cursor, dev)
    }
}

/// Maps a consumer source key back to its origin kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Firehose,
    Knot(String),
    Spindle(String),
}

impl Origin {
    pub fn from_key(key: &str) -> Self {
        if let Some(domain) = key.strip_prefix("knot:") {
            Self::Knot(domain.to_owned())
        } else if let Some(domain) = key.strip_prefix("spindle:") {
            Self::Spindle(domain.to_owned())
        } else {
            Self::Firehose
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knot_key_namespaces_the_cursor() {
        let source = KnotSource::new("knot.example.com").unwrap();
        assert_eq!(source.key(), "knot:knot.example.com");
        assert_eq!(
            Origin::from_key(&source.key()),
            Origin::Knot("knot.example.com".to_owned())
        );
    }

    #[test]
    fn urls_resume_from_the_cursor() {
        let source = KnotSource::new("knot.example.com").unwrap();
        let url = source.url(Some(99), false);
        assert_eq!(url.as_str(), "wss://knot.example.com/events?cursor=99");
        let dev = source.url(None, true);
        assert_eq!(dev.as_str(), "ws://knot.example.com/events");
    }

    #[test]
    fn jetstream_cursor_is_microseconds() {
        let source = JetstreamSource::new("wss://jetstream.example/subscribe").unwrap();
        let url = source.url(Some(5_000_000_000), false);
        assert!(url.as_str().ends_with("cursor=5000000"));
    }

    #[test]
    fn spindle_keys_do_not_collide_with_knots() {
        let knot = KnotSource::new("node.example.com").unwrap();
        let spindle = SpindleSource::new("node.example.com").unwrap();
        assert_ne!(knot.key(), spindle.key());
    }
}
