//! [`Backend`] over the reference server's JSON API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use streak_shared::constants::USER_ID_HEADER;
use streak_shared::protocol::{
    CreateGroupRequest, CreateShareRequest, ErrorBody, FriendRequestBody, ProfileLookupRequest,
    RegisterProfileRequest, ScoreQuery, ShareStatus, UpsertOutcome,
};
use streak_shared::{
    Friendship, JoinCode, ScoreRecord, ShareLink, SocialGroup, SyncError, SyncResult, UserId,
    UserProfile,
};

use super::Backend;

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidInput(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn as_user(&self, builder: RequestBuilder, user: &UserId) -> RequestBuilder {
        builder.header(USER_ID_HEADER, user.as_str())
    }

    async fn send(&self, builder: RequestBuilder) -> SyncResult<reqwest::Response> {
        let resp = builder.send().await.map_err(transport_error)?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        Err(status_error(resp).await)
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> SyncResult<T> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| SyncError::Transient(format!("malformed response: {e}")))
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    debug!(error = %err, "backend request failed");
    SyncError::Transient(err.to_string())
}

/// Map a non-2xx response onto the error taxonomy. The body's `kind`
/// wins when the server sent one; otherwise the status decides.
async fn status_error(resp: reqwest::Response) -> SyncError {
    let status = resp.status();
    let body = resp.json::<ErrorBody>().await.ok();
    if let Some(body) = body {
        return SyncError::from_kind(body.kind, body.error);
    }

    let message = format!("backend responded {status}");
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(message),
        StatusCode::FORBIDDEN => SyncError::Permanent(message),
        StatusCode::CONFLICT => SyncError::Conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SyncError::Transient(message)
        }
        s if s.is_server_error() => SyncError::Transient(message),
        _ => {
            warn!(%status, "unexpected backend status");
            SyncError::Permanent(message)
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn upsert_score(
        &self,
        author: &UserId,
        record: &ScoreRecord,
    ) -> SyncResult<UpsertOutcome> {
        let req = self.client.put(self.url(&format!("/scores/{}", record.id))).json(record);
        self.json(self.as_user(req, author)).await
    }

    async fn query_scores(
        &self,
        reader: &UserId,
        query: &ScoreQuery,
    ) -> SyncResult<Vec<ScoreRecord>> {
        let req = self.client.get(self.url("/scores")).query(query);
        self.json(self.as_user(req, reader)).await
    }

    async fn create_group(
        &self,
        creator: &UserId,
        req: CreateGroupRequest,
    ) -> SyncResult<SocialGroup> {
        let builder = self.client.post(self.url("/groups")).json(&req);
        self.json(self.as_user(builder, creator)).await
    }

    async fn fetch_group(&self, caller: &UserId, group_id: Uuid) -> SyncResult<SocialGroup> {
        let req = self.client.get(self.url(&format!("/groups/{group_id}")));
        self.json(self.as_user(req, caller)).await
    }

    async fn find_group_by_code(
        &self,
        caller: &UserId,
        code: &JoinCode,
    ) -> SyncResult<SocialGroup> {
        let req = self.client.get(self.url(&format!("/join-codes/{}", code.as_str())));
        self.json(self.as_user(req, caller)).await
    }

    async fn add_member(&self, user: &UserId, group_id: Uuid) -> SyncResult<SocialGroup> {
        let req = self.client.put(self.url(&format!("/groups/{group_id}/members/me")));
        self.json(self.as_user(req, user)).await
    }

    async fn remove_member(&self, user: &UserId, group_id: Uuid) -> SyncResult<SocialGroup> {
        let req = self.client.delete(self.url(&format!("/groups/{group_id}/members/me")));
        self.json(self.as_user(req, user)).await
    }

    async fn groups_for_member(&self, user: &UserId) -> SyncResult<Vec<SocialGroup>> {
        let req = self.client.get(self.url("/groups"));
        self.json(self.as_user(req, user)).await
    }

    async fn fetch_share(&self, caller: &UserId, group_id: Uuid) -> SyncResult<Option<ShareLink>> {
        let req = self.client.get(self.url(&format!("/groups/{group_id}/share")));
        self.json(self.as_user(req, caller)).await
    }

    async fn create_share(
        &self,
        caller: &UserId,
        group_id: Uuid,
        capability_version: &str,
    ) -> SyncResult<ShareLink> {
        let body = CreateShareRequest {
            capability_version: capability_version.to_string(),
        };
        let req = self
            .client
            .post(self.url(&format!("/groups/{group_id}/share")))
            .json(&body);
        self.json(self.as_user(req, caller)).await
    }

    async fn delete_share(&self, caller: &UserId, group_id: Uuid) -> SyncResult<()> {
        let req = self.client.delete(self.url(&format!("/groups/{group_id}/share")));
        self.send(self.as_user(req, caller)).await?;
        Ok(())
    }

    async fn share_exists(&self, caller: &UserId, group_id: Uuid) -> SyncResult<bool> {
        let req = self
            .client
            .get(self.url(&format!("/groups/{group_id}/share/status")));
        let status: ShareStatus = self.json(self.as_user(req, caller)).await?;
        Ok(status.exists)
    }

    async fn register_profile(&self, profile: &UserProfile) -> SyncResult<()> {
        let body = RegisterProfileRequest {
            display_name: profile.display_name.clone(),
        };
        let req = self.client.put(self.url("/profiles/me")).json(&body);
        self.send(self.as_user(req, &profile.id)).await?;
        Ok(())
    }

    async fn fetch_profiles(
        &self,
        caller: &UserId,
        ids: &[UserId],
    ) -> SyncResult<Vec<UserProfile>> {
        let body = ProfileLookupRequest { ids: ids.to_vec() };
        let req = self.client.post(self.url("/profiles/lookup")).json(&body);
        self.json(self.as_user(req, caller)).await
    }

    async fn create_friendship(
        &self,
        requester: &UserId,
        recipient: &UserId,
    ) -> SyncResult<Friendship> {
        let body = FriendRequestBody {
            recipient: recipient.clone(),
        };
        let req = self.client.post(self.url("/friendships")).json(&body);
        self.json(self.as_user(req, requester)).await
    }

    async fn fetch_friendship(&self, caller: &UserId, id: Uuid) -> SyncResult<Friendship> {
        let req = self.client.get(self.url(&format!("/friendships/{id}")));
        self.json(self.as_user(req, caller)).await
    }

    async fn friendships_for(&self, caller: &UserId) -> SyncResult<Vec<Friendship>> {
        let req = self.client.get(self.url("/friendships"));
        self.json(self.as_user(req, caller)).await
    }

    async fn accept_friendship(&self, caller: &UserId, id: Uuid) -> SyncResult<Friendship> {
        let req = self.client.post(self.url(&format!("/friendships/{id}/accept")));
        self.json(self.as_user(req, caller)).await
    }
}
