//! Wire format spoken with the search backend.
//!
//! Outbound frames are `{"q": ..}` for live queries (optionally tagged with
//! `"seq"`) and `{"message": ..}` for explicit submits. Inbound frames are
//! `{"data": [...]}` replies, optionally echoing `"seq"`.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outbound<'a> {
    Query {
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        q: &'a str,
    },
    Submit {
        message: &'a str,
    },
}

impl<'a> Outbound<'a> {
    pub fn query(query: &'a Query, seq: Option<u64>) -> Self {
        Self::Query {
            seq,
            q: query.text(),
        }
    }

    pub fn submit(text: &'a str) -> Self {
        Self::Submit { message: text }
    }

    pub fn encode(&self) -> Result<String, ClientError> {
        serde_json::to_string(self).map_err(ClientError::Encode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub seq: Option<u64>,
    pub items: Vec<ResultItem>,
}

/// Parses a backend reply. `"data": null` counts as an empty list; a missing
/// `data` key, a non-object body or a badly shaped item is malformed.
pub fn decode_reply(payload: &str) -> Result<Reply, ClientError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|err| ClientError::malformed(format!("not json: {err}"), payload))?;
    let Some(body) = value.as_object() else {
        return Err(ClientError::malformed("reply is not an object", payload));
    };
    let Some(data) = body.get("data") else {
        return Err(ClientError::malformed("missing field `data`", payload));
    };

    let items = if data.is_null() {
        Vec::new()
    } else {
        Vec::<ResultItem>::deserialize(data)
            .map_err(|err| ClientError::malformed(format!("bad `data`: {err}"), payload))?
    };

    let seq = match body.get("seq") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            raw.as_u64()
                .ok_or_else(|| ClientError::malformed("`seq` is not an unsigned integer", payload))?,
        ),
    };

    Ok(Reply { seq, items })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_encodes_as_q_object() {
        let query = Query::new("cat");
        assert_eq!(
            Outbound::query(&query, None).encode().expect("encode"),
            r#"{"q":"cat"}"#
        );
    }

    #[test]
    fn sequenced_query_puts_seq_first() {
        let query = Query::new("ab");
        assert_eq!(
            Outbound::query(&query, Some(7)).encode().expect("encode"),
            r#"{"seq":7,"q":"ab"}"#
        );
    }

    #[test]
    fn submit_encodes_as_message_object() {
        assert_eq!(
            Outbound::submit("hello \"there\"").encode().expect("encode"),
            r#"{"message":"hello \"there\""}"#
        );
    }

    #[test]
    fn decodes_items_in_received_order() {
        let reply = decode_reply(
            r#"{"data":[{"name":"Zeta","description":"z"},{"id":3,"name":"Alpha","description":"a"}]}"#,
        )
        .expect("decode");
        let names: Vec<&str> = reply.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
        assert_eq!(reply.items[1].id, Some(3));
        assert_eq!(reply.seq, None);
    }

    #[test]
    fn null_data_is_an_empty_reply() {
        let reply = decode_reply(r#"{"data":null}"#).expect("decode");
        assert!(reply.items.is_empty());
    }

    #[test]
    fn decodes_echoed_seq() {
        let reply = decode_reply(r#"{"seq":4,"data":[]}"#).expect("decode");
        assert_eq!(reply.seq, Some(4));
    }

    #[test]
    fn rejects_misspelled_data_key() {
        let err = decode_reply(r#"{"dat":[]}"#).expect_err("malformed");
        assert!(matches!(err, ClientError::MalformedMessage { .. }));
    }

    #[test]
    fn rejects_plain_text_error_from_backend() {
        let err = decode_reply("Invalid request body").expect_err("malformed");
        assert!(err.to_string().contains("not json"));
    }

    #[test]
    fn rejects_item_without_name() {
        assert!(decode_reply(r#"{"data":[{"description":"x"}]}"#).is_err());
    }

    #[test]
    fn rejects_non_object_reply_and_negative_seq() {
        assert!(decode_reply("[1,2]").is_err());
        assert!(decode_reply(r#"{"seq":-1,"data":[]}"#).is_err());
    }
}
