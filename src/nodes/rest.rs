use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use super::{NodeConfig, CLIENT_NAME};
use crate::model::{LoadResult, PlayerInfo, RemoteStats, RoutePlanner, SessionInfo, Track, UpdatePlayer};
use crate::{Error, Result};

/// HTTP client for the REST API of one node.
///
/// Every call is bounded by the configured timeout and never retried.
#[derive(Clone, Debug)]
pub struct Rest {
    client: Client,
    base: String,
}

impl Rest {
    pub fn new(config: &NodeConfig, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&config.auth)?);
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_NAME));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base: config.rest_url(),
        })
    }

    /// Resolves a search query or identifier into tracks.
    pub async fn resolve(&self, identifier: &str) -> Result<Option<LoadResult>> {
        self.fetch(Method::GET, "/loadtracks", &[("identifier", identifier)], None::<&()>)
            .await
    }

    pub async fn decode_track(&self, encoded_track: &str) -> Result<Option<Track>> {
        self.fetch(Method::GET, "/decodetrack", &[("encodedTrack", encoded_track)], None::<&()>)
            .await
    }

    pub async fn decode_tracks(&self, encoded_tracks: &[String]) -> Result<Option<Vec<Track>>> {
        self.fetch(Method::POST, "/decodetracks", &[], Some(encoded_tracks)).await
    }

    pub async fn get_players(&self, session_id: &str) -> Result<Vec<PlayerInfo>> {
        let path = format!("/sessions/{}/players", session_id);
        let players = self.fetch(Method::GET, &path, &[], None::<&()>).await?;

        Ok(players.unwrap_or_default())
    }

    pub async fn get_player(&self, session_id: &str, guild_id: u64) -> Result<Option<PlayerInfo>> {
        let path = format!("/sessions/{}/players/{}", session_id, guild_id);

        self.fetch(Method::GET, &path, &[], None::<&()>).await
    }

    /// Applies a partial update to a player, creating it if needed.
    ///
    /// With `no_replace`, a track in the update does not replace a track that
    /// is already playing.
    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: u64,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<Option<PlayerInfo>> {
        let path = format!("/sessions/{}/players/{}", session_id, guild_id);
        let no_replace = if no_replace { "true" } else { "false" };

        self.fetch(Method::PATCH, &path, &[("noReplace", no_replace)], Some(update))
            .await
    }

    pub async fn destroy_player(&self, session_id: &str, guild_id: u64) -> Result<()> {
        let path = format!("/sessions/{}/players/{}", session_id, guild_id);
        self.fetch::<Value, ()>(Method::DELETE, &path, &[], None).await?;

        Ok(())
    }

    /// Configures whether the node keeps this session alive for `timeout`
    /// seconds after the socket closes.
    pub async fn update_session(
        &self,
        session_id: &str,
        resuming: bool,
        timeout: u64,
    ) -> Result<Option<SessionInfo>> {
        let path = format!("/sessions/{}", session_id);
        let body = SessionInfo { resuming, timeout };

        self.fetch(Method::PATCH, &path, &[], Some(&body)).await
    }

    pub async fn stats(&self) -> Result<Option<RemoteStats>> {
        self.fetch(Method::GET, "/stats", &[], None::<&()>).await
    }

    pub async fn route_planner_status(&self) -> Result<Option<RoutePlanner>> {
        self.fetch(Method::GET, "/routeplanner/status", &[], None::<&()>).await
    }

    pub async fn unmark_failed_address(&self, address: &str) -> Result<()> {
        let body = json!({ "address": address });
        self.fetch::<Value, _>(Method::POST, "/routeplanner/free/address", &[], Some(&body))
            .await?;

        Ok(())
    }

    pub async fn unmark_all_failed_addresses(&self) -> Result<()> {
        self.fetch::<Value, ()>(Method::POST, "/routeplanner/free/all", &[], None)
            .await?;

        Ok(())
    }

    /// Sends a request and parses the response body.
    ///
    /// A successful response whose body is empty or not of the expected shape
    /// resolves to `None`.
    async fn fetch<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base, path);
        trace!("{} {}", method, url);

        let sends_body = method != Method::GET && method != Method::HEAD;
        let mut request = self.client.request(method, &url).query(query);

        if let (Some(body), true) = (body, sends_body) {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("message")?.as_str().map(ToOwned::to_owned));

            debug!("{} failed with {}: {:?}", url, status, message);

            return Err(Error::Request {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await?;

        if bytes.is_empty() {
            return Ok(None);
        }

        Ok(serde_json::from_slice(&bytes).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn rest_for(server: &MockServer) -> Rest {
        let config = NodeConfig::new("test", server.address().to_string(), "youshallnotpass");

        Rest::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn update_player_sends_partial_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v4/sessions/abc/players/42"))
            .and(query_param("noReplace", "false"))
            .and(header("Authorization", "youshallnotpass"))
            .and(body_json(json!({ "volume": 0 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "guildId": "42",
                "volume": 0,
                "paused": false,
                "voice": { "token": "", "endpoint": "", "sessionId": "" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let update = UpdatePlayer {
            volume: Some(0),
            ..Default::default()
        };
        let player = rest_for(&server)
            .await
            .update_player("abc", 42, &update, false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(player.guild_id, 42);
        assert_eq!(player.volume, 0);
    }

    #[tokio::test]
    async fn failed_request_carries_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v4/sessions/abc/players/1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "timestamp": 1667857581613u64,
                "status": 404,
                "error": "Not Found",
                "message": "Session not found",
                "path": "/v4/sessions/abc/players/1"
            })))
            .mount(&server)
            .await;

        let err = rest_for(&server).await.destroy_player("abc", 1).await.unwrap_err();

        match err {
            Error::Request { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message.as_deref(), Some("Session not found"));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_request_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/stats"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = rest_for(&server).await.stats().await.unwrap_err();

        assert!(matches!(err, Error::Request { status: 503, message: None }));
    }

    #[tokio::test]
    async fn empty_body_resolves_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/routeplanner/free/all"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        rest_for(&server).await.unmark_all_failed_addresses().await.unwrap();
    }

    #[tokio::test]
    async fn resolve_passes_identifier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/loadtracks"))
            .and(query_param("identifier", "ytsearch:never gonna"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "loadType": "empty",
                "data": {}
            })))
            .mount(&server)
            .await;

        let result = rest_for(&server)
            .await
            .resolve("ytsearch:never gonna")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.load_type, crate::model::LoadType::Empty);
    }

    #[tokio::test]
    async fn slow_node_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/stats"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = NodeConfig::new("test", server.address().to_string(), "pw");
        let rest = Rest::new(&config, Duration::from_millis(100)).unwrap();

        assert!(matches!(rest.stats().await, Err(Error::RequestTimeout)));
    }
}
