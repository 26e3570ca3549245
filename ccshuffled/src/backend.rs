//! Effects backend client.
//!
//! The backend speaks tRPC over HTTPS: queries are `GET
//! {base}/{procedure}?input={json}`, mutations `POST {base}/{procedure}`
//! with a JSON body; both answer `{"result":{"data":...}}`.

use std::time::Duration;

use async_trait::async_trait;
use ccshuffle::candidate::EffectCandidate;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, ORIGIN};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::{BackendConfig, Credentials};

const INTERACT_ORIGIN: &str = "https://interact.crowdcontrol.live";
const USER_AGENT: &str = concat!("ccshuffled/", env!("CARGO_PKG_VERSION"));

const ACTIVE_SESSION: &str = "gameSession.getUsersActiveGameSession";
const SESSION_MENU: &str = "gameSession.getGameSessionMenu";
const REQUEST_EFFECT: &str = "gameSession.requestEffect";
const CONTRIBUTE_TO_POOL: &str = "gameSession.contributeToPool";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{endpoint}: {source}")]
    Http {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("{endpoint}: unexpected response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("no active game session")]
    NoActiveSession,
    #[error("{endpoint} timed out after {after:?}")]
    Timeout {
        endpoint: &'static str,
        after: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "gameSessionID")]
    pub id: String,
    #[serde(rename = "gamePackID", default)]
    pub game_pack_id: Option<String>,
    #[serde(default)]
    pub game_name: Option<String>,
}

/// What the backend reports for an accepted request or contribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectRequestResult {
    #[serde(rename = "requestID", default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait EffectBackend: Send + Sync {
    /// The session currently live for the account.
    async fn active_session(&self) -> Result<SessionInfo, BackendError>;

    /// Full effect menu of `session_id`.
    async fn session_menu(&self, session_id: &str) -> Result<Vec<EffectCandidate>, BackendError>;

    async fn request_effect(
        &self,
        session_id: &str,
        candidate: &EffectCandidate,
        quantity: i64,
    ) -> Result<EffectRequestResult, BackendError>;

    async fn contribute_to_pool(
        &self,
        session_id: &str,
        candidate: &EffectCandidate,
        amount: i64,
    ) -> Result<EffectRequestResult, BackendError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Wire shapes
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: EnvelopeResult<T>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResult<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ActiveSessionData {
    session: Option<RawSession>,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    #[serde(rename = "gameSessionID")]
    id: String,
    #[serde(rename = "gamePackID", default)]
    game_pack_id: Option<String>,
    #[serde(rename = "gamePack", default)]
    game_pack: Option<RawGamePack>,
}

#[derive(Debug, Deserialize)]
struct RawGamePack {
    game: Option<RawGame>,
}

#[derive(Debug, Deserialize)]
struct RawGame {
    name: Option<String>,
}

impl From<RawSession> for SessionInfo {
    fn from(raw: RawSession) -> Self {
        Self {
            id: raw.id,
            game_pack_id: raw.game_pack_id,
            game_name: raw.game_pack.and_then(|p| p.game).and_then(|g| g.name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MenuData {
    menu: RawMenu,
}

#[derive(Debug, Deserialize)]
struct RawMenu {
    #[serde(default)]
    effects: Vec<EffectCandidate>,
}

#[derive(Debug, Deserialize)]
struct EffectRequestData {
    #[serde(rename = "effectRequest", default)]
    effect_request: EffectRequestResult,
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, body: &str) -> Result<T, BackendError> {
    serde_json::from_str::<Envelope<T>>(body)
        .map(|e| e.result.data)
        .map_err(|source| BackendError::Decode { endpoint, source })
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════════════════════

pub struct HttpBackend {
    client: reqwest::Client,
    api_base: String,
    ccuid: String,
}

impl HttpBackend {
    pub fn new(cfg: &BackendConfig, credentials: &Credentials) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ORIGIN, HeaderValue::from_static(INTERACT_ORIGIN));
        if let Ok(mut token) = HeaderValue::from_str(&credentials.auth_token) {
            token.set_sensitive(true);
            headers.insert(AUTHORIZATION, token);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|source| BackendError::Http {
                endpoint: "client",
                source,
            })?;

        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            ccuid: credentials.ccuid.clone(),
        })
    }

    fn url(&self, procedure: &str) -> String {
        format!("{}/{}", self.api_base, procedure)
    }

    async fn query<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        input: serde_json::Value,
    ) -> Result<T, BackendError> {
        let request = self
            .client
            .get(self.url(endpoint))
            .query(&[("input", input.to_string())]);
        let body = Self::send(endpoint, request).await?;
        decode(endpoint, &body)
    }

    async fn mutate<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: serde_json::Value,
    ) -> Result<T, BackendError> {
        let request = self.client.post(self.url(endpoint)).json(&body);
        let body = Self::send(endpoint, request).await?;
        decode(endpoint, &body)
    }

    async fn send(
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, BackendError> {
        let http = |source| BackendError::Http { endpoint, source };
        let resp = request.send().await.map_err(http)?;
        let status = resp.status();
        let body = resp.text().await.map_err(http)?;
        if !status.is_success() {
            return Err(BackendError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl EffectBackend for HttpBackend {
    async fn active_session(&self) -> Result<SessionInfo, BackendError> {
        let data: ActiveSessionData = self
            .query(ACTIVE_SESSION, json!({ "ccUID": self.ccuid }))
            .await?;
        data.session
            .map(SessionInfo::from)
            .ok_or(BackendError::NoActiveSession)
    }

    async fn session_menu(&self, session_id: &str) -> Result<Vec<EffectCandidate>, BackendError> {
        let data: MenuData = self
            .query(SESSION_MENU, json!({ "gameSessionID": session_id }))
            .await?;
        Ok(data.menu.effects)
    }

    async fn request_effect(
        &self,
        session_id: &str,
        candidate: &EffectCandidate,
        quantity: i64,
    ) -> Result<EffectRequestResult, BackendError> {
        let body = json!({
            "gameSessionID": session_id,
            "effectType": candidate.effect_type,
            "effectID": candidate.id,
            "price": candidate.price,
            "quantity": quantity,
            "anonymous": true,
        });
        let data: EffectRequestData = self.mutate(REQUEST_EFFECT, body).await?;
        Ok(data.effect_request)
    }

    async fn contribute_to_pool(
        &self,
        session_id: &str,
        candidate: &EffectCandidate,
        amount: i64,
    ) -> Result<EffectRequestResult, BackendError> {
        let body = json!({
            "gameSessionID": session_id,
            "effectType": candidate.effect_type,
            "effectID": candidate.id,
            "amount": amount,
            "anonymous": true,
        });
        let data: EffectRequestData = self.mutate(CONTRIBUTE_TO_POOL, body).await?;
        Ok(data.effect_request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_active_session_envelope() {
        let body = r#"{"result":{"data":{"session":{
            "gameSessionID":"gs-1","gamePackID":"pack",
            "gamePack":{"game":{"name":"Super Game"}},"owner":{}}}}}"#;
        let data: ActiveSessionData = decode(ACTIVE_SESSION, body).unwrap();
        let info = SessionInfo::from(data.session.unwrap());
        assert_eq!(info.id, "gs-1");
        assert_eq!(info.game_pack_id.as_deref(), Some("pack"));
        assert_eq!(info.game_name.as_deref(), Some("Super Game"));

        let none: ActiveSessionData =
            decode(ACTIVE_SESSION, r#"{"result":{"data":{"session":null}}}"#).unwrap();
        assert!(none.session.is_none());
    }

    #[test]
    fn decodes_menu_effects() {
        let body = r#"{"result":{"data":{"menu":{"effects":[
            {"effectID":"kill","name":"Kill","type":"game","price":250,"note":"ouch"},
            {"effectID":"coins","name":"Coins","type":"game","price":5,"quantity":{"min":1,"max":99},"inactive":true}
        ]}}}}"#;
        let data: MenuData = decode(SESSION_MENU, body).unwrap();
        let effects = data.menu.effects;
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].id, "kill");
        assert_eq!(effects[0].note.as_deref(), Some("ouch"));
        assert!(effects[1].inactive);
        assert_eq!(effects[1].quantity.as_ref().unwrap().bounds(), (1, 99));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode::<MenuData>(SESSION_MENU, "<html>").unwrap_err();
        assert!(matches!(err, BackendError::Decode { endpoint: SESSION_MENU, .. }));
    }

    #[test]
    fn client_builds_with_prefixed_token() {
        let creds = Credentials::new("cc-auth-token abc", "u1");
        let backend = HttpBackend::new(&BackendConfig::default(), &creds).unwrap();
        assert_eq!(
            backend.url(REQUEST_EFFECT),
            "https://trpc.crowdcontrol.live/gameSession.requestEffect"
        );
    }
}
