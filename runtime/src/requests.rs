//! Named data requests.
//!
//! A [`RequestManager`] keeps request templates by name and sends them as JSON with
//! `reqwest`. [`RequestManager::send`] records the answer into the dispatch store
//! (`INS_RES` into `responses`), so a server document carries the fetched data in its
//! hydration snapshot and the client does not fetch it again.
//!
//! ```ignore
//! let manager = Arc::new(RequestManager::new()?);
//! manager.set_new_request("posts", RequestManager::create_request("/api/posts", json!({"page": 1})));
//!
//! app.use_fn(move |ctx: &mut Context, next| {
//!     let manager = Arc::clone(&manager);
//!     Box::pin(async move {
//!         manager.send(ctx, "posts").await?;
//!         next.run(ctx).await;
//!         Ok(())
//!     })
//! });
//! ```

use std::collections::BTreeMap;
use std::fmt;

use http::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use http::{HeaderMap, HeaderValue, Method};
use isomorph_core::Value;
use parking_lot::RwLock;
use reqwest::Url;

use crate::context::Context;
use crate::error::RequestError;
use crate::states::record_response;

/// When the incoming request's cookies travel with a data request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Credentials {
    /// Never
    Omit,
    /// Only to the origin the page itself was requested from
    #[default]
    SameOrigin,
    /// To any origin
    Include,
}

/// Method, headers, JSON body and credentials of a data request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// HTTP method
    pub method: Method,
    /// Headers sent as given
    pub headers: HeaderMap,
    /// JSON payload
    pub body: Option<Value>,
    /// Cookie forwarding policy
    pub credentials: Credentials,
}

impl RequestOptions {
    /// `POST` of `body` with JSON `Accept` and `Content-Type` and same-origin
    /// credentials.
    #[must_use]
    pub fn json(body: Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            method: Method::POST,
            headers,
            body: Some(body),
            credentials: Credentials::SameOrigin,
        }
    }

    /// Use `method` instead of `POST`.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Use `credentials` instead of same-origin.
    #[must_use]
    pub const fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::json(Value::Object(serde_json::Map::new()))
    }
}

/// A target URL, absolute or relative to the page's origin, and its options.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    /// Target URL
    pub url: String,
    /// How to send it
    pub options: RequestOptions,
}

impl DataRequest {
    /// Request for `url` with `options`.
    #[must_use]
    pub fn new(url: impl Into<String>, options: RequestOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }
}

/// What a data request takes over from the dispatch that sends it.
#[derive(Debug, Clone, Default)]
pub struct Incoming {
    /// Origin of the page request; relative URLs resolve against it
    pub origin: Option<Url>,
    /// `Cookie` header of the page request
    pub cookie: Option<HeaderValue>,
}

impl Incoming {
    /// Origin and cookies of `ctx`'s request.
    #[must_use]
    pub fn of(ctx: &Context) -> Self {
        let request = ctx.request();
        Self {
            origin: Url::parse(&format!("{}://{}/", request.protocol, request.hostname)).ok(),
            cookie: ctx.raw_request().headers.get(COOKIE).cloned(),
        }
    }
}

/// Registry of named data requests and the client that sends them.
pub struct RequestManager {
    client: reqwest::Client,
    requests: RwLock<BTreeMap<String, DataRequest>>,
}

impl RequestManager {
    /// Manager with a default client.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Client`] if the client cannot be built.
    pub fn new() -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(RequestError::Client)?;
        Ok(Self::with_client(client))
    }

    /// Manager sending through `client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            requests: RwLock::new(BTreeMap::new()),
        }
    }

    /// A JSON `POST` of `body` to `url`.
    #[must_use]
    pub fn create_request(url: impl Into<String>, body: Value) -> DataRequest {
        DataRequest::new(url, RequestOptions::json(body))
    }

    /// Register `request` as `name`, replacing an earlier one.
    pub fn set_new_request(&self, name: impl Into<String>, request: DataRequest) -> &Self {
        self.requests.write().insert(name.into(), request);
        self
    }

    /// The request registered as `name`.
    #[must_use]
    pub fn request(&self, name: &str) -> Option<DataRequest> {
        self.requests.read().get(name).cloned()
    }

    /// Unregister `name`.
    pub fn remove_request(&self, name: &str) -> Option<DataRequest> {
        self.requests.write().remove(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.requests.read().keys().cloned().collect()
    }

    /// Send `request` and return its JSON answer.
    ///
    /// An answer whose `data` member is set is unwrapped to that member.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidUrl`] if the URL cannot be resolved,
    /// [`RequestError::Transport`] if the exchange fails, [`RequestError::Status`] for
    /// a non-success answer and [`RequestError::Decode`] if the body is not JSON.
    pub async fn fetch(&self, from: Incoming, request: &DataRequest) -> Result<Value, RequestError> {
        let url = resolve(&request.url, from.origin.as_ref())?;
        let options = &request.options;

        let mut headers = options.headers.clone();
        if let Some(cookie) = from.cookie {
            if forwards_cookies(options.credentials, &url, from.origin.as_ref()) {
                headers.insert(COOKIE, cookie);
            }
        }

        let mut builder = self
            .client
            .request(options.method.clone(), url.clone())
            .headers(headers);
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        tracing::debug!(%url, method = %options.method, "Sending data request");
        let response = builder
            .send()
            .await
            .map_err(|source| RequestError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let answer = response
            .json::<Value>()
            .await
            .map_err(|source| RequestError::Decode {
                url: url.to_string(),
                source,
            })?;
        Ok(unwrap_data(answer))
    }

    /// Send the request registered as `name` on behalf of `ctx` and record the
    /// answer into its store.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] if nothing is registered as `name`,
    /// otherwise the errors of [`fetch`](Self::fetch).
    pub async fn send(&self, ctx: &mut Context, name: &str) -> Result<Value, RequestError> {
        let request = self
            .request(name)
            .ok_or_else(|| RequestError::UnknownRequest(name.to_string()))?;
        self.send_request(ctx, &request).await
    }

    /// Send `request` on behalf of `ctx` and record the answer into its store.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn send_request(
        &self,
        ctx: &mut Context,
        request: &DataRequest,
    ) -> Result<Value, RequestError> {
        let answer = self.fetch(Incoming::of(ctx), request).await?;
        if is_truthy(&answer) && !record_response(ctx, answer.clone()) {
            tracing::debug!(url = %request.url, "No dispatch store, answer not recorded");
        }
        Ok(answer)
    }
}

impl fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestManager")
            .field("requests", &self.names())
            .finish_non_exhaustive()
    }
}

fn resolve(url: &str, origin: Option<&Url>) -> Result<Url, RequestError> {
    let resolved = match origin {
        Some(origin) => origin.join(url),
        None => Url::parse(url),
    };
    resolved.map_err(|error| RequestError::InvalidUrl {
        url: url.to_string(),
        reason: error.to_string(),
    })
}

fn forwards_cookies(credentials: Credentials, target: &Url, origin: Option<&Url>) -> bool {
    match credentials {
        Credentials::Omit => false,
        Credentials::SameOrigin => origin.is_some_and(|origin| origin.origin() == target.origin()),
        Credentials::Include => true,
    }
}

fn unwrap_data(answer: Value) -> Value {
    match answer {
        Value::Object(mut fields) if fields.get("data").is_some_and(is_truthy) => {
            fields.remove("data").unwrap_or_default()
        },
        other => other,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n.abs() > 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
