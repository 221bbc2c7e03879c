//! Outbound HTTP client with an interceptor chain

mod interceptor;

pub use interceptor::{Exchange, Interceptor, InterceptorNext, LoggingInterceptor, MetricsInterceptor};

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode};
use futures::future::BoxFuture;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::application::errors::ClientError;

/// A request as seen by interceptors
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    pub fn body_text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// A fully read response
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl OutboundResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct HttpClientBuilder {
    base_url: String,
    timeout: Duration,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Interceptors wrap in registration order: the first added sees the
    /// request first and the response last
    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn build(self) -> Result<HttpClient, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        let base: Exchange = Arc::new(
            move |request: OutboundRequest| -> BoxFuture<'static, Result<OutboundResponse, ClientError>> {
                let client = client.clone();
                Box::pin(async move { send(&client, request).await })
            },
        );

        let exchange = self.interceptors.iter().rev().fold(base, |inner, interceptor| {
            let interceptor = Arc::clone(interceptor);
            let wrapped: Exchange = Arc::new(
                move |request: OutboundRequest| -> BoxFuture<'static, Result<OutboundResponse, ClientError>> {
                    let interceptor = Arc::clone(&interceptor);
                    let next = InterceptorNext::new(Arc::clone(&inner));
                    Box::pin(async move { interceptor.intercept(request, next).await })
                },
            );
            wrapped
        });

        Ok(HttpClient {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            exchange,
        })
    }
}

async fn send(client: &reqwest::Client, request: OutboundRequest) -> Result<OutboundResponse, ClientError> {
    let mut builder = client.request(request.method, request.url);
    for (key, value) in &request.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    Ok(OutboundResponse { status, body })
}

/// Outbound-call collaborator: GET/POST/PUT/DELETE against one base URL
pub struct HttpClient {
    base_url: String,
    exchange: Exchange,
}

impl HttpClient {
    pub fn builder(base_url: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            interceptors: Vec::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<P: Serialize>(
        &self,
        endpoint: &str,
        params: &P,
        headers: &[(&str, &str)],
    ) -> Result<OutboundResponse, ClientError> {
        let url = build_url(&format!("{}{}", self.base_url, endpoint), params)?;
        self.execute(Method::GET, url, headers, None).await
    }

    pub async fn delete<P: Serialize>(
        &self,
        endpoint: &str,
        params: &P,
        headers: &[(&str, &str)],
    ) -> Result<OutboundResponse, ClientError> {
        let url = build_url(&format!("{}{}", self.base_url, endpoint), params)?;
        self.execute(Method::DELETE, url, headers, None).await
    }

    pub async fn post<B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
        headers: &[(&str, &str)],
    ) -> Result<OutboundResponse, ClientError> {
        let url = self.parse(endpoint)?;
        self.execute(Method::POST, url, headers, Some(serde_json::to_vec(body)?))
            .await
    }

    pub async fn put<B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
        headers: &[(&str, &str)],
    ) -> Result<OutboundResponse, ClientError> {
        let url = self.parse(endpoint)?;
        self.execute(Method::PUT, url, headers, Some(serde_json::to_vec(body)?))
            .await
    }

    fn parse(&self, endpoint: &str) -> Result<Url, ClientError> {
        let raw = format!("{}{}", self.base_url, endpoint);
        Url::parse(&raw).map_err(|e| ClientError::Url(format!("{}: {}", raw, e)))
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<OutboundResponse, ClientError> {
        let mut all_headers: Vec<(String, String)> = Vec::with_capacity(headers.len() + 1);
        if body.is_some() {
            all_headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        all_headers.extend(headers.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let request = OutboundRequest {
            method,
            url,
            headers: all_headers,
            body,
        };

        let response = (self.exchange)(request).await?;
        if !response.status.is_success() {
            return Err(ClientError::Status {
                status: response.status,
                body: response.text(),
            });
        }
        Ok(response)
    }
}

/// Fill a URL template from the fields of `params`.
///
/// With `{name}` placeholders in the template, each field replaces
/// `{lowercased field name}`. Otherwise every field is appended as a query
/// pair under its lowercased name. `params` must serialise to a map, or to
/// unit/null for no parameters.
pub fn build_url<P: Serialize>(template: &str, params: &P) -> Result<Url, ClientError> {
    let fields = match serde_json::to_value(params)? {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(ClientError::Url(format!(
                "url parameters must be a struct or map, got {}",
                other
            )))
        }
    };

    if template.contains('{') {
        let mut filled = template.to_string();
        for (name, value) in &fields {
            let placeholder = format!("{{{}}}", name.to_lowercase());
            filled = filled.replace(&placeholder, &render(value));
        }
        return Url::parse(&filled).map_err(|e| ClientError::Url(format!("{}: {}", filled, e)));
    }

    let mut url = Url::parse(template).map_err(|e| ClientError::Url(format!("{}: {}", template, e)))?;
    if !fields.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &fields {
            if value.is_null() {
                continue;
            }
            pairs.append_pair(&name.to_lowercase(), &render(value));
        }
    }
    Ok(url)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use prometheus::Registry;

    #[derive(Serialize)]
    struct UserPath {
        #[serde(rename = "UserID")]
        user_id: u64,
        name: String,
    }

    async fn start_mock(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_build_url_path_params() {
        let url = build_url(
            "http://api.local/user/{userid}/profile/{name}",
            &UserPath {
                user_id: 7,
                name: "ann".to_string(),
            },
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://api.local/user/7/profile/ann");
    }

    #[test]
    fn test_build_url_query_params() {
        let url = build_url(
            "http://api.local/users",
            &UserPath {
                user_id: 7,
                name: "ann lee".to_string(),
            },
        )
        .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("userid".to_string(), "7".to_string())));
        assert!(pairs.contains(&("name".to_string(), "ann lee".to_string())));
    }

    #[test]
    fn test_build_url_rejects_scalars() {
        assert!(matches!(
            build_url("http://api.local/users", &42),
            Err(ClientError::Url(_))
        ));
        assert!(build_url("http://api.local/users", &()).is_ok());
    }

    #[tokio::test]
    async fn test_get_and_post_round_trip() {
        let app = Router::new()
            .route("/echo", get(|| async { "pong" }))
            .route(
                "/users",
                post(|Json(body): Json<serde_json::Value>| async move { Json(body) }),
            );
        let base = start_mock(app).await;
        let client = HttpClient::builder(base).build().unwrap();

        let response = client.get("/echo", &(), &[]).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "pong");

        let response = client
            .post("/users", &serde_json::json!({"name": "ann"}), &[("x-trace", "1")])
            .await
            .unwrap();
        let echoed: serde_json::Value = response.json().unwrap();
        assert_eq!(echoed["name"], "ann");
    }

    #[tokio::test]
    async fn test_non_success_status_is_error_with_body() {
        let app = Router::new().route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "no such thing") }),
        );
        let base = start_mock(app).await;
        let client = HttpClient::builder(base).build().unwrap();

        match client.get("/missing", &(), &[]).await {
            Err(ClientError::Status { status, body }) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "no such thing");
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.status)),
        }
    }

    #[tokio::test]
    async fn test_metrics_interceptor_counts_calls() {
        let app = Router::new().route("/echo", get(|| async { "pong" }));
        let base = start_mock(app).await;
        let registry = Registry::new();
        let client = HttpClient::builder(base)
            .interceptor(LoggingInterceptor::new(true))
            .interceptor(MetricsInterceptor::new(&registry).unwrap())
            .build()
            .unwrap();

        client.get("/echo", &(), &[]).await.unwrap();
        client.get("/echo", &(), &[]).await.unwrap();

        let families = registry.gather();
        let total = families
            .iter()
            .find(|f| f.get_name() == "http_client_requests_total")
            .unwrap();
        let count: f64 = total
            .get_metric()
            .iter()
            .map(|m| m.get_counter().get_value())
            .sum();
        assert_eq!(count, 2.0);
    }
}
