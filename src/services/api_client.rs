//! HTTP client for the event backend.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};
use validator::Validate;

use crate::{
    dto::{
        api::{
            Activity, ApiResponse, AuditInfo, CODE_OK, CODE_UNAUTHORIZED, CheckInRequest,
            CheckInStatus, DanmakuRequest, RoundResult, ScoreSubmission, Winning,
        },
        round::{ActivityId, RemoteId, Round, RoundId},
    },
    error::ApiError,
};

/// Header carrying the attendee token.
pub const TOKEN_HEADER: &str = "x-token";
/// Request timeout applied to every call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CURRENT_ROUND_PATH: &str = "h5/shake/round/current";
const ROUND_RESULT_PATH: &str = "h5/shake/result";
const SCORE_PATH: &str = "h5/shake/score";
const AUDIT_PATH: &str = "h5/user/audit";
const MY_WINNINGS_PATH: &str = "h5/prize/my";
const WINNING_DETAIL_PATH: &str = "h5/prize/winning";

/// Backend calls the game session depends on.
pub trait GameApi: Send + Sync {
    /// Round currently relevant for the activity, if any.
    fn current_round(
        &self,
        activity_id: ActivityId,
    ) -> BoxFuture<'static, Result<Option<Round>, ApiError>>;
    fn submit_score(
        &self,
        round_id: RoundId,
        score: u32,
    ) -> BoxFuture<'static, Result<(), ApiError>>;
    fn round_result(
        &self,
        round_id: RoundId,
    ) -> BoxFuture<'static, Result<Option<RoundResult>, ApiError>>;
}

/// [`GameApi`] over HTTP plus the attendee calls outside the game.
#[derive(Clone)]
pub struct HttpGameApi {
    client: Client,
    base_url: Arc<str>,
    token: Option<Arc<str>>,
}

impl HttpGameApi {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ApiError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            token: token.map(Arc::from),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token.as_ref()),
            None => builder,
        }
    }

    async fn call<T>(&self, path: &str, builder: RequestBuilder) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let response = builder.send().await.map_err(|source| ApiError::Request {
            path: path.to_string(),
            source,
        })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(ApiError::Unauthorized),
            status if !status.is_success() => {
                return Err(ApiError::Status {
                    path: path.to_string(),
                    status,
                });
            }
            _ => {}
        }

        let envelope = response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|source| ApiError::Decode {
                path: path.to_string(),
                source,
            })?;

        match envelope.code {
            CODE_OK => Ok(envelope.data),
            CODE_UNAUTHORIZED => {
                warn!(path, "token rejected by backend");
                Err(ApiError::Unauthorized)
            }
            code => Err(ApiError::Rejected {
                code,
                msg: envelope.msg,
            }),
        }
    }

    async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let builder = self.request(Method::GET, path).query(query);
        self.call(path, builder).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<Option<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::POST, path).json(body);
        self.call(path, builder).await
    }

    /// Activity details, including which features the organisers enabled.
    pub async fn activity(&self, activity_id: &ActivityId) -> Result<Activity, ApiError> {
        let path = "h5/activity";
        self.get::<Activity>(path, &[("id", activity_id.as_str())])
            .await?
            .ok_or_else(|| ApiError::MissingData { path: path.into() })
    }

    pub async fn check_in(&self, activity_id: &ActivityId) -> Result<(), ApiError> {
        let body = CheckInRequest {
            activity_id: activity_id.clone(),
        };
        self.post::<_, serde_json::Value>("h5/checkIn", &body).await?;
        Ok(())
    }

    pub async fn check_in_status(&self, activity_id: &ActivityId) -> Result<CheckInStatus, ApiError> {
        let path = format!("h5/checkIn/status/{activity_id}");
        self.get::<CheckInStatus>(&path, &[])
            .await?
            .ok_or(ApiError::MissingData { path })
    }

    /// Organiser review of the attendee's registration.
    pub async fn audit_status(&self) -> Result<AuditInfo, ApiError> {
        self.get::<AuditInfo>(AUDIT_PATH, &[])
            .await?
            .ok_or_else(|| ApiError::MissingData {
                path: AUDIT_PATH.into(),
            })
    }

    /// Prizes the attendee won in this activity.
    pub async fn my_winnings(&self, activity_id: &ActivityId) -> Result<Vec<Winning>, ApiError> {
        Ok(self
            .get::<Vec<Winning>>(MY_WINNINGS_PATH, &[("activityId", activity_id.as_str())])
            .await?
            .unwrap_or_default())
    }

    pub async fn winning_detail(&self, winner_id: &RemoteId) -> Result<Winning, ApiError> {
        self.get::<Winning>(WINNING_DETAIL_PATH, &[("winnerId", winner_id.as_str())])
            .await?
            .ok_or_else(|| ApiError::MissingData {
                path: WINNING_DETAIL_PATH.into(),
            })
    }

    /// Post a message to the live wall. Content is validated before sending.
    pub async fn send_danmaku(&self, activity_id: &ActivityId, content: &str) -> Result<(), ApiError> {
        let body = DanmakuRequest {
            activity_id: activity_id.clone(),
            content: content.trim().to_string(),
        };
        body.validate()?;
        self.post::<_, serde_json::Value>("h5/danmaku", &body).await?;
        debug!(activity_id = %activity_id, "message posted for moderation");
        Ok(())
    }
}

impl GameApi for HttpGameApi {
    fn current_round(
        &self,
        activity_id: ActivityId,
    ) -> BoxFuture<'static, Result<Option<Round>, ApiError>> {
        let api = self.clone();
        Box::pin(async move {
            api.get::<Round>(CURRENT_ROUND_PATH, &[("activityId", activity_id.as_str())])
                .await
        })
    }

    fn submit_score(
        &self,
        round_id: RoundId,
        score: u32,
    ) -> BoxFuture<'static, Result<(), ApiError>> {
        let api = self.clone();
        Box::pin(async move {
            let body = ScoreSubmission { round_id, score };
            api.post::<_, serde_json::Value>(SCORE_PATH, &body).await?;
            Ok(())
        })
    }

    fn round_result(
        &self,
        round_id: RoundId,
    ) -> BoxFuture<'static, Result<Option<RoundResult>, ApiError>> {
        let api = self.clone();
        Box::pin(async move {
            api.get::<RoundResult>(ROUND_RESULT_PATH, &[("roundId", round_id.as_str())])
                .await
        })
    }
}
