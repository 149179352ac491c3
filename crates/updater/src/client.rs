use std::fmt;
use std::future::Future;
use std::time::Duration;

use avatar_core::api::{
    CreateSessionRequest, CreateSessionResponse, GetRecordResponse, PutRecordRequest,
    PutRecordResponse, XrpcErrorBody,
};
use avatar_core::{ProfileRecord, UpdateError, PROFILE_COLLECTION, PROFILE_RKEY};
use reqwest::{Client, Response, StatusCode, Url};
use tracing::debug;

/// Acknowledgement of a successful write: new record URI and CID.
pub type Ack = PutRecordResponse;

/// Authenticated session. Lives for one invocation only.
#[derive(Clone)]
pub struct Session {
    pub did: String,
    pub handle: String,
    access_jwt: String,
}

impl Session {
    pub fn new(did: impl Into<String>, handle: impl Into<String>, access_jwt: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            handle: handle.into(),
            access_jwt: access_jwt.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// The three remote operations the orchestrator needs.
pub trait ProfileApi {
    fn authenticate(
        &self,
        handle: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, UpdateError>>;

    fn fetch_record(
        &self,
        did: &str,
        session: &Session,
    ) -> impl Future<Output = Result<ProfileRecord, UpdateError>>;

    /// Writes `record` whole; conditional on `record.revision`.
    fn replace_record(
        &self,
        did: &str,
        session: &Session,
        record: &ProfileRecord,
    ) -> impl Future<Output = Result<Ack, UpdateError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    CreateSession,
    GetRecord,
    PutRecord,
}

/// XRPC client for a single PDS.
#[derive(Debug, Clone)]
pub struct ProfileClient {
    endpoint: Url,
    http: Client,
}

impl ProfileClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, UpdateError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpdateError::Config(format!("building http client: {e}")))?;
        Ok(Self::with_http(endpoint, http))
    }

    pub fn with_http(endpoint: Url, http: Client) -> Self {
        Self { endpoint, http }
    }
}

/// `{endpoint}/xrpc/{nsid}`, keeping any base path on the endpoint.
pub fn xrpc_url(endpoint: &Url, nsid: &str) -> Result<Url, UpdateError> {
    let base = endpoint.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/xrpc/{nsid}"))
        .map_err(|e| UpdateError::Config(format!("bad xrpc url for {nsid}: {e}")))
}

impl ProfileApi for ProfileClient {
    async fn authenticate(&self, handle: &str, password: &str) -> Result<Session, UpdateError> {
        let url = xrpc_url(&self.endpoint, "com.atproto.server.createSession")?;
        let req = CreateSessionRequest {
            identifier: handle.to_string(),
            password: password.to_string(),
        };
        let resp = self
            .http
            .post(url)
            .json(&req)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(map_error(Call::CreateSession, resp).await);
        }
        let body: CreateSessionResponse = resp
            .json()
            .await
            .map_err(|e| UpdateError::Auth(format!("malformed session response: {e}")))?;
        debug!("session established for {} ({})", body.handle, body.did);
        Ok(Session::new(body.did, body.handle, body.access_jwt))
    }

    async fn fetch_record(&self, did: &str, session: &Session) -> Result<ProfileRecord, UpdateError> {
        let mut url = xrpc_url(&self.endpoint, "com.atproto.repo.getRecord")?;
        url.query_pairs_mut()
            .append_pair("repo", did)
            .append_pair("collection", PROFILE_COLLECTION)
            .append_pair("rkey", PROFILE_RKEY);
        let resp = self
            .http
            .get(url)
            .bearer_auth(&session.access_jwt)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(map_error(Call::GetRecord, resp).await);
        }
        let body: GetRecordResponse = resp
            .json()
            .await
            .map_err(|e| UpdateError::Transient(format!("malformed getRecord response: {e}")))?;
        debug!("fetched {} at revision {:?}", body.uri, body.cid);
        Ok(ProfileRecord::new(body.value, body.cid))
    }

    async fn replace_record(
        &self,
        did: &str,
        session: &Session,
        record: &ProfileRecord,
    ) -> Result<Ack, UpdateError> {
        let url = xrpc_url(&self.endpoint, "com.atproto.repo.putRecord")?;
        let req = PutRecordRequest::profile(did, record);
        let resp = self
            .http
            .post(url)
            .bearer_auth(&session.access_jwt)
            .json(&req)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(map_error(Call::PutRecord, resp).await);
        }
        resp.json::<Ack>()
            .await
            .map_err(|e| UpdateError::Transient(format!("malformed putRecord response: {e}")))
    }
}

fn transport(e: reqwest::Error) -> UpdateError {
    if e.is_timeout() {
        UpdateError::Transient(format!("request timed out: {e}"))
    } else {
        UpdateError::Transient(format!("request failed: {e}"))
    }
}

async fn map_error(call: Call, resp: Response) -> UpdateError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let body: XrpcErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let name = body.error.as_deref().unwrap_or("");
    let detail = format!(
        "{status} {name}: {}",
        body.message.as_deref().unwrap_or(text.trim())
    );
    classify(call, status, name, detail)
}

fn classify(call: Call, status: StatusCode, name: &str, detail: String) -> UpdateError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return UpdateError::Transient(detail);
    }
    match call {
        Call::CreateSession => UpdateError::Auth(detail),
        Call::GetRecord => match (status, name) {
            (StatusCode::NOT_FOUND, _) | (_, "RecordNotFound") => UpdateError::NotFound(detail),
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => UpdateError::Auth(detail),
            _ => UpdateError::Transient(detail),
        },
        Call::PutRecord => match (status, name) {
            (StatusCode::CONFLICT, _) | (_, "InvalidSwap") => UpdateError::Conflict(detail),
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => UpdateError::Auth(detail),
            _ => UpdateError::Transient(detail),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xrpc_url_keeps_base_path() {
        let u = Url::parse("https://pds.example/base/").unwrap();
        assert_eq!(
            xrpc_url(&u, "_health").unwrap().as_str(),
            "https://pds.example/base/xrpc/_health"
        );
    }

    #[test]
    fn classifies_xrpc_errors() {
        let d = || String::from("x");
        assert!(matches!(
            classify(Call::GetRecord, StatusCode::BAD_REQUEST, "RecordNotFound", d()),
            UpdateError::NotFound(_)
        ));
        assert!(matches!(
            classify(Call::PutRecord, StatusCode::BAD_REQUEST, "InvalidSwap", d()),
            UpdateError::Conflict(_)
        ));
        assert!(matches!(
            classify(Call::PutRecord, StatusCode::BAD_GATEWAY, "", d()),
            UpdateError::Transient(_)
        ));
        assert!(matches!(
            classify(Call::CreateSession, StatusCode::UNAUTHORIZED, "AuthenticationRequired", d()),
            UpdateError::Auth(_)
        ));
        assert!(matches!(
            classify(Call::CreateSession, StatusCode::SERVICE_UNAVAILABLE, "", d()),
            UpdateError::Transient(_)
        ));
    }

    #[test]
    fn session_debug_hides_token() {
        let s = Session::new("did:plc:a", "h", "secret-jwt");
        assert!(!format!("{s:?}").contains("secret-jwt"));
    }
}
