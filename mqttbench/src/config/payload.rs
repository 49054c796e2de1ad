use mqttbench_lib::payload::PayloadSpec;
use rama::error::{BoxError, ErrorContext as _};
use serde_json::Value;

/// How the `--payload` argument is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PayloadFormat {
    /// plain text
    #[default]
    Txt,
    /// a JSON object
    Jo,
    /// a JSON array
    Ja,
}

impl PayloadFormat {
    pub fn parse(self, payload: &str) -> Result<PayloadSpec, BoxError> {
        match self {
            Self::Txt => Ok(PayloadSpec::Text(payload.to_owned())),
            Self::Jo => {
                let value: Value =
                    serde_json::from_str(payload).context("parse payload as JSON object")?;
                if !value.is_object() {
                    return Err(BoxError::from("payload format 'jo' expects a JSON object"));
                }
                Ok(PayloadSpec::Tree(value))
            }
            Self::Ja => {
                let value: Value =
                    serde_json::from_str(payload).context("parse payload as JSON array")?;
                if !value.is_array() {
                    return Err(BoxError::from("payload format 'ja' expects a JSON array"));
                }
                Ok(PayloadSpec::Tree(value))
            }
        }
    }
}
