use std::path::Path;

use rama::error::{BoxError, ErrorContext as _};
use serde::Deserialize;
use serde_json::Value;

/// Per-client overrides as found in the `--file` JSON array.
///
/// Absent, empty and zero fields inherit the command line value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOverride {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub qos: Option<u8>,
    /// Post-publish wait in milliseconds.
    #[serde(default)]
    pub wait: Option<u64>,
}

impl ClientOverride {
    /// Map empty and zero values onto "not defined".
    pub fn normalized(self) -> Self {
        fn text(value: Option<String>) -> Option<String> {
            value.filter(|s| !s.is_empty())
        }
        fn number<T: Default + PartialEq>(value: Option<T>) -> Option<T> {
            value.filter(|n| *n != T::default())
        }

        Self {
            username: text(self.username),
            password: text(self.password),
            client_id: text(self.client_id),
            topic: text(self.topic),
            payload: self.payload.filter(|v| match v {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            }),
            count: number(self.count),
            qos: number(self.qos),
            wait: number(self.wait),
        }
    }
}

pub fn parse_overrides(raw: &[u8]) -> Result<Vec<ClientOverride>, BoxError> {
    let records: Vec<ClientOverride> =
        serde_json::from_slice(raw).context("parse client config file as JSON array")?;
    Ok(records.into_iter().map(ClientOverride::normalized).collect())
}

pub async fn load_overrides(path: &Path) -> Result<Vec<ClientOverride>, BoxError> {
    let raw = tokio::fs::read(path)
        .await
        .context("read client config file")
        .with_context_debug_field("path", || path.to_owned())?;
    parse_overrides(&raw).with_context_debug_field("path", || path.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides() {
        let records = parse_overrides(
            br#"[
                {"username": "", "password":"", "clientId":"", "qos":0, "payload":"", "count": 1, "wait": 300, "topic":""},
                {"username": "alice", "password": "secret", "clientId": "c-1", "qos": 2, "payload": {"a": "${rand4}"}, "topic": "/x"},
                {}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            records,
            vec![
                ClientOverride {
                    count: Some(1),
                    wait: Some(300),
                    ..Default::default()
                },
                ClientOverride {
                    username: Some("alice".to_owned()),
                    password: Some("secret".to_owned()),
                    client_id: Some("c-1".to_owned()),
                    topic: Some("/x".to_owned()),
                    payload: Some(serde_json::json!({"a": "${rand4}"})),
                    qos: Some(2),
                    ..Default::default()
                },
                ClientOverride::default(),
            ]
        );
    }

    #[test]
    fn test_parse_overrides_invalid() {
        for input in [
            "",
            "{}",
            r#"[{"count": -1}]"#,
            r#"[{"qos": "one"}]"#,
            "[1, 2]",
        ] {
            if let Ok(records) = parse_overrides(input.as_bytes()) {
                panic!("input = '{input}', unexpected result {records:?}");
            }
        }
    }

    #[test]
    fn test_parse_overrides_ignores_unknown_fields() {
        let records = parse_overrides(br#"[{"topic": "/t", "retain": true}]"#).unwrap();
        assert_eq!(records[0].topic.as_deref(), Some("/t"));
    }
}
