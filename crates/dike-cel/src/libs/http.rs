//! Outbound HTTP calls through the `http` global.
//!
//! Expressions call `http.Get(url)` or `http.Post(url, body)`, optionally with
//! a header map, and receive the JSON-decoded response body. A client trusting
//! a caller-supplied CA bundle is obtained with `http.Client(caBundle)`.
//!
//! Transport is pluggable through [`HttpClient`]; the default implementation
//! is [`ReqwestClient`].

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::activation::EvalContext;
use crate::decls::{CallContext, Declarations, Global, Overload};
use crate::error::EvalError;
use crate::libs::receiver;
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::{OpaqueValue, Value};

/// Object type of the `http` global.
pub const CONTEXT_TYPE: &str = "http.Context";

/// Options for the default HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    /// Upper bound for a single request.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("dike/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpOptions {
    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// HTTP method of an [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// `GET`.
    Get,
    /// `POST` with a JSON body.
    Post,
}

/// A request issued by an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Target URL.
    pub url: String,
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
    /// JSON body, for `POST`.
    pub body: Option<serde_json::Value>,
}

/// Transport used by the `http` library.
pub trait HttpClient: Send + Sync {
    /// Sends a request and decodes the response body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a description of the transport or decoding failure.
    fn send(&self, request: HttpRequest, context: &EvalContext) -> Result<serde_json::Value, String>;

    /// Returns a client that additionally trusts the PEM encoded `ca_bundle`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if the bundle cannot be parsed.
    fn with_ca_bundle(&self, ca_bundle: &str) -> Result<Arc<dyn HttpClient>, String>;
}

/// [`HttpClient`] backed by a blocking `reqwest` client.
///
/// The underlying client is built on first use.
pub struct ReqwestClient {
    options: HttpOptions,
    ca_bundle: Option<reqwest::Certificate>,
    client: OnceCell<reqwest::blocking::Client>,
}

impl ReqwestClient {
    /// Creates a client.
    #[must_use]
    pub fn new(options: HttpOptions) -> Self {
        Self {
            options,
            ca_bundle: None,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, String> {
        self.client.get_or_try_init(|| {
            let mut builder = reqwest::blocking::Client::builder()
                .user_agent(self.options.user_agent.clone())
                .timeout(self.options.timeout);
            if let Some(cert) = &self.ca_bundle {
                builder = builder.add_root_certificate(cert.clone());
            }
            builder.build().map_err(|e| e.to_string())
        })
    }
}

impl fmt::Debug for ReqwestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestClient")
            .field("options", &self.options)
            .field("ca_bundle", &self.ca_bundle.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: HttpRequest, context: &EvalContext) -> Result<serde_json::Value, String> {
        let url = url::Url::parse(&request.url).map_err(|e| format!("invalid url '{}': {e}", request.url))?;
        let client = self.client()?;
        let mut builder = match request.method {
            HttpMethod::Get => client.get(url),
            HttpMethod::Post => client.post(url),
        };
        let timeout = context
            .remaining()
            .map_or(self.options.timeout, |remaining| remaining.min(self.options.timeout));
        builder = builder.timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        debug!(method = ?request.method, url = %request.url, "sending http request");
        let response = builder.send().map_err(|e| e.to_string())?;
        response
            .json::<serde_json::Value>()
            .map_err(|e| format!("failed to decode response body: {e}"))
    }

    fn with_ca_bundle(&self, ca_bundle: &str) -> Result<Arc<dyn HttpClient>, String> {
        x509_parser::pem::parse_x509_pem(ca_bundle.as_bytes()).map_err(|e| format!("invalid CA bundle: {e}"))?;
        let cert = reqwest::Certificate::from_pem(ca_bundle.as_bytes()).map_err(|e| e.to_string())?;
        Ok(Arc::new(Self {
            options: self.options.clone(),
            ca_bundle: Some(cert),
            client: OnceCell::new(),
        }))
    }
}

/// The value behind the `http` global.
#[derive(Clone)]
pub struct HttpContext {
    client: Arc<dyn HttpClient>,
}

impl HttpContext {
    /// Wraps a client.
    #[must_use]
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext").finish_non_exhaustive()
    }
}

impl OpaqueValue for HttpContext {
    fn type_name(&self) -> &str {
        CONTEXT_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn global(options: &HttpOptions) -> Global {
    let context = HttpContext::new(Arc::new(ReqwestClient::new(options.clone())));
    Global::new("http", Type::object(CONTEXT_TYPE), Value::opaque(context))
}

fn headers(value: &Value, index: usize) -> Result<BTreeMap<String, String>, EvalError> {
    let entries = value
        .as_map()
        .ok_or_else(|| EvalError::invalid_argument(index, format!("expected map, found {}", value.type_of())))?;
    entries
        .iter()
        .map(|(k, v)| {
            let v = v
                .as_str()
                .ok_or_else(|| EvalError::invalid_argument(index, format!("header '{k}' is not a string")))?;
            Ok((k.to_string(), v.to_string()))
        })
        .collect()
}

fn send(
    call: &CallContext<'_>,
    args: &[Value],
    method: HttpMethod,
    body: Option<usize>,
    header_arg: Option<usize>,
) -> Result<Value, EvalError> {
    let http = receiver::<HttpContext>(args, CONTEXT_TYPE)?;
    let request = HttpRequest {
        method,
        url: arg_str(args, 1)?.to_string(),
        headers: match header_arg {
            Some(index) => headers(&args[index], index)?,
            None => BTreeMap::new(),
        },
        body: match body {
            Some(index) => Some(args[index].to_json()?),
            None => None,
        },
    };
    call.context.check()?;
    let response = http
        .client
        .send(request, call.context)
        .map_err(|e| EvalError::function(format!("http.{}", call.function), e))?;
    Ok(Value::from_json(&response))
}

pub(crate) fn declarations() -> Declarations {
    let ctx = || Type::object(CONTEXT_TYPE);
    let header_map = || Type::map(Type::String, Type::String);
    Declarations::default()
        .with_type(ObjectType::opaque(CONTEXT_TYPE))
        .with_function(
            "Get",
            vec![
                Overload::method("http_get_string", vec![ctx(), Type::String], Type::Dyn, |call, args| {
                    send(call, args, HttpMethod::Get, None, None)
                }),
                Overload::method(
                    "http_get_string_map",
                    vec![ctx(), Type::String, header_map()],
                    Type::Dyn,
                    |call, args| send(call, args, HttpMethod::Get, None, Some(2)),
                ),
            ],
        )
        .with_function(
            "Post",
            vec![
                Overload::method(
                    "http_post_string_dyn",
                    vec![ctx(), Type::String, Type::Dyn],
                    Type::Dyn,
                    |call, args| send(call, args, HttpMethod::Post, Some(2), None),
                ),
                Overload::method(
                    "http_post_string_dyn_map",
                    vec![ctx(), Type::String, Type::Dyn, header_map()],
                    Type::Dyn,
                    |call, args| send(call, args, HttpMethod::Post, Some(2), Some(3)),
                ),
            ],
        )
        .with_function(
            "Client",
            vec![Overload::method("http_client_string", vec![ctx(), Type::String], ctx(), |_, args| {
                let http = receiver::<HttpContext>(args, CONTEXT_TYPE)?;
                let client = http
                    .client
                    .with_ca_bundle(arg_str(args, 1)?)
                    .map_err(|e| EvalError::function("http.Client", e))?;
                Ok(Value::opaque(HttpContext::new(client)))
            })],
        )
}
