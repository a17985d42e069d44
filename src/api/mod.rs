//! REST client for the diagnosis service.
//!
//! Every request carries the session cookie from the `CookieJar`. A 401 from
//! a path outside `AUTH_EXEMPT_PATHS` logs the user out: the auth context and
//! the jar are cleared before `ClientError::Unauthorized` is returned.

pub mod cookies;
pub mod types;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{is_auth_exempt, AuthContext};
use crate::error::{ClientError, ClientResult};
use crate::history::HistoryQuery;
use crate::session::PredictionBackend;
pub use cookies::CookieJar;
use types::{
    AuthStatus, ChangePasswordRequest, Credentials, DeleteHistoryRequest, ErrorBody, HistoryPage,
    HistoryWire, PredictCropRequest, PredictRequest, PredictionResponse, StatusMessage,
    UpdateProfileRequest, UserProfile, UserStats,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
pub const PREDICT_TIMEOUT: Duration = Duration::from_secs(120);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error bodies are read up to this size.
const MAX_ERROR_BODY_BYTES: u64 = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    /// Timeout for `/api/predict` and `/api/predict-crop`.
    pub predict_timeout: Duration,
    /// Timeout for every other endpoint.
    pub request_timeout: Duration,
    /// Where the session cookie is persisted; `None` keeps it in memory.
    pub cookie_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            predict_timeout: PREDICT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            cookie_path: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

pub struct ApiClient {
    cfg: ApiConfig,
    agent: ureq::Agent,
    jar: CookieJar,
    auth: AuthContext,
}

impl ApiClient {
    /// Build a client, restoring the persisted session if there is one.
    pub fn new(cfg: ApiConfig) -> ClientResult<Self> {
        let base = url::Url::parse(&cfg.base_url).map_err(|e| {
            ClientError::Validation(format!("invalid base url {}: {}", cfg.base_url, e))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::Validation(format!(
                "base url must be http(s), got {}",
                cfg.base_url
            )));
        }
        let jar = match &cfg.cookie_path {
            Some(path) => CookieJar::open(path)?,
            None => CookieJar::in_memory(),
        };
        let auth = match jar.email() {
            Some(email) if !jar.is_empty() => AuthContext::logged_in(email),
            _ => AuthContext::new(),
        };
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(cfg.request_timeout)
            .build();
        Ok(Self {
            cfg,
            agent,
            jar,
            auth,
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.cfg
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.jar
    }

    /// Absolute URL for a server-relative path such as `predict_img_url`.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    pub fn predict(&mut self, request: &PredictRequest) -> ClientResult<PredictionResponse> {
        let timeout = self.cfg.predict_timeout;
        self.send(Method::Post, "/api/predict", &[], Some(request), timeout)
    }

    pub fn predict_crop(
        &mut self,
        request: &PredictCropRequest,
    ) -> ClientResult<PredictionResponse> {
        let timeout = self.cfg.predict_timeout;
        self.send(Method::Post, "/api/predict-crop", &[], Some(request), timeout)
    }

    pub fn history(&mut self, query: &HistoryQuery) -> ClientResult<HistoryPage> {
        let params = query.to_params();
        let timeout = self.cfg.request_timeout;
        let wire: HistoryWire =
            self.send::<HistoryWire, ()>(Method::Get, "/history", &params, None, timeout)?;
        Ok(wire.normalize(query.per_page))
    }

    pub fn delete_history(&mut self, record_id: i64) -> ClientResult<StatusMessage> {
        let timeout = self.cfg.request_timeout;
        self.send(
            Method::Delete,
            "/history/delete",
            &[],
            Some(&DeleteHistoryRequest { record_id }),
            timeout,
        )
    }

    pub fn profile(&mut self) -> ClientResult<UserProfile> {
        let timeout = self.cfg.request_timeout;
        self.send::<_, ()>(Method::Get, "/user/profile", &[], None, timeout)
    }

    pub fn stats(&mut self) -> ClientResult<UserStats> {
        let timeout = self.cfg.request_timeout;
        self.send::<_, ()>(Method::Get, "/user/stats", &[], None, timeout)
    }

    pub fn change_password(
        &mut self,
        old_password: &str,
        new_password: &str,
    ) -> ClientResult<StatusMessage> {
        crate::auth::validate_password(new_password)?;
        let timeout = self.cfg.request_timeout;
        self.send(
            Method::Post,
            "/user/change-password",
            &[],
            Some(&ChangePasswordRequest {
                old_password,
                new_password,
            }),
            timeout,
        )
    }

    pub fn update_profile(&mut self, username: &str) -> ClientResult<StatusMessage> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::Validation(
                "username must not be empty".to_string(),
            ));
        }
        let timeout = self.cfg.request_timeout;
        self.send(
            Method::Post,
            "/user/update-profile",
            &[],
            Some(&UpdateProfileRequest { username }),
            timeout,
        )
    }

    pub fn register(&mut self, email: &str, password: &str) -> ClientResult<StatusMessage> {
        crate::auth::validate_email(email)?;
        crate::auth::validate_password(password)?;
        let timeout = self.cfg.request_timeout;
        self.send(
            Method::Post,
            "/register",
            &[],
            Some(&Credentials { email, password }),
            timeout,
        )
    }

    pub fn login(&mut self, email: &str, password: &str) -> ClientResult<StatusMessage> {
        crate::auth::validate_email(email)?;
        let timeout = self.cfg.request_timeout;
        let status: StatusMessage = self.send(
            Method::Post,
            "/login",
            &[],
            Some(&Credentials { email, password }),
            timeout,
        )?;
        let email = status.email.clone().unwrap_or_else(|| email.to_string());
        self.jar.set_email(Some(email.clone()));
        self.jar.save()?;
        self.auth.login(email);
        Ok(status)
    }

    /// Log out on the server, then forget the local session whatever it answered.
    pub fn logout(&mut self) -> ClientResult<()> {
        let timeout = self.cfg.request_timeout;
        let result = self.send::<StatusMessage, ()>(Method::Post, "/logout", &[], None, timeout);
        self.forget_session()?;
        match result {
            Ok(_) | Err(ClientError::Unauthorized(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Ask the server who we are and sync the auth context with the answer.
    pub fn check_auth(&mut self) -> ClientResult<AuthStatus> {
        let timeout = self.cfg.request_timeout;
        let status: AuthStatus =
            self.send::<_, ()>(Method::Get, "/check-auth", &[], None, timeout)?;
        match (status.authenticated, status.email.as_deref()) {
            (true, Some(email)) => {
                if self.auth.email() != Some(email) {
                    self.jar.set_email(Some(email.to_string()));
                    self.jar.save()?;
                    self.auth.login(email);
                }
            }
            (true, None) => {}
            (false, _) => self.forget_session()?,
        }
        Ok(status)
    }

    fn forget_session(&mut self) -> ClientResult<()> {
        self.auth.logout();
        self.jar.clear();
        self.jar.save()
    }

    fn send<T, B>(
        &mut self,
        method: Method,
        path: &str,
        query: &[(&'static str, String)],
        body: Option<&B>,
        timeout: Duration,
    ) -> ClientResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path);
        let mut request = self
            .agent
            .request(method.as_str(), &url)
            .timeout(timeout)
            .set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }
        if let Some(cookie) = self.jar.header() {
            request = request.set("Cookie", &cookie);
        }
        log::debug!("ApiClient: {} {}", method.as_str(), path);

        let result = match body {
            Some(body) => request.send_json(serde_json::to_value(body)?),
            None => request.call(),
        };
        match result {
            Ok(response) => {
                self.absorb_cookies(&response)?;
                response.into_json::<T>().map_err(|e| {
                    ClientError::InvalidResponse(format!(
                        "{} {}: {}",
                        method.as_str(),
                        path,
                        e
                    ))
                })
            }
            Err(ureq::Error::Status(status, response)) => {
                self.absorb_cookies(&response)?;
                let message = read_error_message(response, status);
                if status == 401 && !is_auth_exempt(path) {
                    log::warn!("ApiClient: {} answered 401; session cleared", path);
                    self.forget_session()?;
                    return Err(ClientError::Unauthorized(path.to_string()));
                }
                log::warn!("ApiClient: {} answered {}: {}", path, status, message);
                Err(ClientError::Server { status, message })
            }
            Err(ureq::Error::Transport(transport)) => {
                if is_timeout(&transport) {
                    Err(ClientError::Timeout(timeout.as_secs()))
                } else {
                    Err(ClientError::Network(transport.to_string()))
                }
            }
        }
    }

    fn absorb_cookies(&mut self, response: &ureq::Response) -> ClientResult<()> {
        let mut changed = false;
        for value in response.all("set-cookie") {
            changed |= self.jar.absorb(value);
        }
        if changed {
            self.jar.save()?;
        }
        Ok(())
    }
}

impl PredictionBackend for ApiClient {
    fn predict(&mut self, request: &PredictRequest) -> ClientResult<PredictionResponse> {
        ApiClient::predict(self, request)
    }

    fn predict_crop(&mut self, request: &PredictCropRequest) -> ClientResult<PredictionResponse> {
        ApiClient::predict_crop(self, request)
    }
}

/// The server's `error` (or `message`) field, falling back to the status text.
fn read_error_message(response: ureq::Response, status: u16) -> String {
    let status_text = response.status_text().to_string();
    let mut raw = String::new();
    if response
        .into_reader()
        .take(MAX_ERROR_BODY_BYTES)
        .read_to_string(&mut raw)
        .is_err()
    {
        return format!("HTTP {} {}", status, status_text);
    }
    match serde_json::from_str::<ErrorBody>(&raw) {
        Ok(ErrorBody {
            error: Some(error), ..
        }) => error,
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ if !raw.trim().is_empty() && raw.len() < 200 => raw.trim().to_string(),
        _ => format!("HTTP {} {}", status, status_text),
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = err.source();
    }
    transport.to_string().contains("timed out")
}
