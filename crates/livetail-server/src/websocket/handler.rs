//! Inbound message decoding. A client only ever sends filters.

use axum::extract::ws::Message;
use livetail_events::Query;
use tracing::{debug, instrument};

/// What an inbound frame asks the reader to do.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// Replace the session filter.
    Filter(Query),
    /// The frame could not be decoded as a filter.
    Malformed(String),
    /// The client closed the connection.
    Close,
    /// Control frame with nothing to do.
    Ignore,
}

/// Decode a JSON filter.
pub fn decode_filter(text: &str) -> Result<Query, serde_json::Error> {
    serde_json::from_str(text)
}

/// Classify an inbound websocket frame. Binary frames are accepted when they
/// carry UTF-8 JSON.
#[instrument(skip_all)]
pub fn classify(message: &Message) -> Inbound {
    let text = match message {
        Message::Text(text) => text.as_str(),
        Message::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => text,
            Err(_) => {
                debug!(len = data.len(), "received non-UTF8 binary frame");
                return Inbound::Malformed("binary frame is not UTF-8".into());
            }
        },
        Message::Close(_) => return Inbound::Close,
        Message::Ping(_) | Message::Pong(_) => return Inbound::Ignore,
    };
    match decode_filter(text) {
        Ok(filter) => Inbound::Filter(filter),
        Err(e) => Inbound::Malformed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use livetail_events::Comparison;

    #[test]
    fn decodes_full_filter() {
        let q = decode_filter(
            r#"{"key":"app.*","entities":["user/foo"],"importance":{"comparison":"gte","value":3}}"#,
        )
        .unwrap();
        assert_eq!(q.key, "app.*");
        assert_eq!(q.entities, vec!["user/foo".to_string()]);
        assert_eq!(q.importance.unwrap().comparison, Comparison::Gte);
    }

    #[test]
    fn empty_object_is_match_all() {
        assert!(decode_filter("{}").unwrap().is_empty());
    }

    #[test]
    fn text_frame_is_filter() {
        let msg = Message::Text(r#"{"tags":["a"]}"#.into());
        assert_matches!(classify(&msg), Inbound::Filter(q) if q.tags == vec!["a".to_string()]);
    }

    #[test]
    fn binary_utf8_frame_is_filter() {
        let msg = Message::Binary(br#"{"origin":"app"}"#.to_vec().into());
        assert_matches!(classify(&msg), Inbound::Filter(q) if q.origin == "app");
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert_matches!(
            classify(&Message::Text("not json".into())),
            Inbound::Malformed(_)
        );
        assert_matches!(
            classify(&Message::Text(r#"{"entities":"scalar"}"#.into())),
            Inbound::Malformed(_)
        );
    }

    #[test]
    fn non_utf8_binary_is_malformed() {
        let msg = Message::Binary(vec![0xff, 0xfe].into());
        assert_matches!(classify(&msg), Inbound::Malformed(_));
    }

    #[test]
    fn control_frames() {
        assert_eq!(classify(&Message::Close(None)), Inbound::Close);
        assert_eq!(classify(&Message::Ping(vec![].into())), Inbound::Ignore);
    }
}
