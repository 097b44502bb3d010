use reqwest::Response;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ApiError;
use crate::service::Api;
use crate::types::{
    AuthPoll, AuthStart, ConnectionStatus, Disconnected, LibrarySection, MediaFile, MediaStats,
    SavedResponse, ScanJob, ScanRequest, ServerCandidate, ServerPick, SyncCancelled, SyncStarted,
    SyncStatus, TrimJob, TrimRequest,
};

/// HTTP client for the backend REST API.
#[derive(Debug, Clone)]
pub struct Client {
    base: Url,
    http: reqwest::Client,
}

impl Client {
    /// Build a client for the backend at `base_url`, e.g. `http://localhost:8000`.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    async fn check_response(resp: Response) -> Result<Response, ApiError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(ApiError::Api {
                status,
                message: body,
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.http.get(self.url(path)).send().await?;
        let resp = Self::check_response(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}

impl Api for Client {
    async fn connection_status(&self) -> Result<ConnectionStatus, ApiError> {
        self.get_json("/api/plex/status").await
    }

    async fn start_auth(&self) -> Result<AuthStart, ApiError> {
        let resp = self
            .http
            .post(self.url("/api/plex/auth/start"))
            .send()
            .await?;
        let resp = Self::check_response(resp).await?;
        let pin: AuthStart = resp
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        tracing::info!(pin_id = pin.pin_id, "authorization code issued");
        Ok(pin)
    }

    async fn poll_auth(&self, pin_id: i64) -> Result<bool, ApiError> {
        let body: AuthPoll = self
            .get_json(&format!("/api/plex/auth/poll/{pin_id}"))
            .await?;
        Ok(body.authenticated)
    }

    async fn list_servers(&self) -> Result<Vec<ServerCandidate>, ApiError> {
        self.get_json("/api/plex/servers").await
    }

    async fn select_server(&self, pick: ServerPick) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/api/plex/server"))
            .json(&pick)
            .send()
            .await?;
        Self::check_response(resp).await?;
        Ok(())
    }

    async fn list_libraries(&self) -> Result<Vec<LibrarySection>, ApiError> {
        self.get_json("/api/plex/libraries").await
    }

    async fn save_library_selection(&self, keys: Vec<String>) -> Result<(), ApiError> {
        let resp = self
            .http
            .put(self.url("/api/plex/library-selection"))
            .json(&serde_json::json!({ "keys": keys }))
            .send()
            .await?;
        let resp = Self::check_response(resp).await?;
        let _: SavedResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(())
    }

    async fn start_sync(&self) -> Result<bool, ApiError> {
        let resp = self.http.post(self.url("/api/plex/sync")).send().await?;
        let resp = Self::check_response(resp).await?;
        let body: SyncStarted = resp
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(body.started)
    }

    async fn sync_status(&self) -> Result<SyncStatus, ApiError> {
        self.get_json("/api/plex/sync/status").await
    }

    async fn cancel_sync(&self) -> Result<bool, ApiError> {
        let resp = self.http.delete(self.url("/api/plex/sync")).send().await?;
        let resp = Self::check_response(resp).await?;
        let body: SyncCancelled = resp
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(body.cancelled)
    }

    async fn disconnect(&self) -> Result<(), ApiError> {
        let resp = self
            .http
            .delete(self.url("/api/plex/disconnect"))
            .send()
            .await?;
        let resp = Self::check_response(resp).await?;
        let _: Disconnected = resp
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(())
    }

    async fn active_scan_jobs(&self) -> Result<Vec<ScanJob>, ApiError> {
        self.get_json("/api/scan/active").await
    }

    async fn get_scan_job(&self, id: i64) -> Result<ScanJob, ApiError> {
        self.get_json(&format!("/api/scan/{id}")).await
    }

    async fn start_scan(&self, req: ScanRequest) -> Result<ScanJob, ApiError> {
        let resp = self
            .http
            .post(self.url("/api/scan/"))
            .json(&req)
            .send()
            .await?;
        let resp = Self::check_response(resp).await?;
        resp.json::<ScanJob>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn cancel_scan_job(&self, id: i64) -> Result<(), ApiError> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/scan/{id}")))
            .send()
            .await?;
        Self::check_response(resp).await?;
        Ok(())
    }

    async fn get_media(&self, id: i64) -> Result<MediaFile, ApiError> {
        self.get_json(&format!("/api/media/{id}")).await
    }

    async fn media_stats(&self) -> Result<MediaStats, ApiError> {
        self.get_json("/api/media/stats").await
    }

    async fn submit_trim(&self, media_id: i64, req: TrimRequest) -> Result<TrimJob, ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/media/{media_id}/trim")))
            .json(&req)
            .send()
            .await?;
        let resp = Self::check_response(resp).await?;
        resp.json::<TrimJob>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn get_trim_job(&self, media_id: i64, job_id: i64) -> Result<TrimJob, ApiError> {
        self.get_json(&format!("/api/media/{media_id}/trim-jobs/{job_id}"))
            .await
    }
}
