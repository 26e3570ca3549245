//! Operator IPC protocol between `ccshuffled` and its clients.
//!
//! Newline-delimited JSON, one request per line, tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::round::{OptionSummary, RoundStage};
use crate::weights::WeightConfig;

pub const DEFAULT_ADDR: &str = "127.0.0.1:9877";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    GetState,
    Start,
    Stop,
    Pause { paused: bool },
    /// Set the remaining seconds of the current stage; `None` skips to its end.
    Cycle { seconds: Option<u32> },
    SetIntervals { round_secs: i64, cooldown_secs: i64 },
    SetCostWeight {
        weight: i64,
        factor: i64,
        #[serde(default)]
        max_price: Option<i64>,
    },
    SetPoolWeight { weight: i64, factor: i64 },
    /// A chat message relayed by the chat bridge.
    Vote { voter: String, text: String },
    /// Stream `Round` responses to this connection whenever a round opens.
    Subscribe,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    State(StatusSnapshot),
    Round { options: Vec<String> },
    Success { message: String },
    Error { message: String },
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub started: bool,
    pub stopping: bool,
    pub listener_running: bool,
    pub paused: bool,
    pub stage: RoundStage,
    pub time_left: u32,
    pub rounds_built: u64,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub game_name: Option<String>,
    #[serde(default)]
    pub interact_link: Option<String>,
    pub weights: WeightConfig,
    pub candidates: usize,
    pub eligible: usize,
    #[serde(default)]
    pub options: Vec<OptionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_type_tag() {
        let r: Request = serde_json::from_str(r#"{"type":"Vote","voter":"Ann","text":"3"}"#).unwrap();
        assert_eq!(
            r,
            Request::Vote {
                voter: "Ann".into(),
                text: "3".into()
            }
        );
        let r: Request =
            serde_json::from_str(r#"{"type":"SetCostWeight","weight":-10,"factor":2}"#).unwrap();
        assert_eq!(
            r,
            Request::SetCostWeight {
                weight: -10,
                factor: 2,
                max_price: None
            }
        );
        let r: Request = serde_json::from_str(r#"{"type":"Cycle","seconds":null}"#).unwrap();
        assert_eq!(r, Request::Cycle { seconds: None });
        assert!(serde_json::from_str::<Request>(r#"{"type":"Explode"}"#).is_err());
    }

    #[test]
    fn response_round_trips_through_json() {
        let resp = Response::Round {
            options: vec!["1. Squash".into(), "[5] Random".into()],
        };
        let line = serde_json::to_string(&resp).unwrap();
        assert!(line.starts_with(r#"{"type":"Round""#));
        assert_eq!(serde_json::from_str::<Response>(&line).unwrap(), resp);
    }
}
