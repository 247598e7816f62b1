use crate::domain::ports::{
    ClassifyReply, ClassifyRequest, ComparisonService, ContradictionReply, MergeReply,
    MergeRequest, MergeService, SimilarityReply,
};
use crate::utils::error::{BlendError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpServiceConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
}

impl HttpServiceConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: Option<u64>) -> Self {
        self.timeout = seconds.map(Duration::from_secs);
        self
    }
}

/// JSON over HTTP；單次呼叫，不重試
#[derive(Debug, Clone)]
struct JsonEndpoint {
    service: &'static str,
    config: HttpServiceConfig,
    client: Client,
}

impl JsonEndpoint {
    fn new(service: &'static str, config: HttpServiceConfig) -> Self {
        Self {
            service,
            config,
            client: Client::new(),
        }
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path);
        tracing::debug!("📡 {} service request: POST {}", self.service, url);

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BlendError::service(self.service, format!("POST {}: {}", url, e)))?;

        let status = response.status();
        tracing::debug!("📡 {} service response status: {}", self.service, status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BlendError::service(
                self.service,
                format!("POST {} returned {}: {}", url, status, body.trim()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BlendError::service(self.service, format!("invalid reply from {}: {}", url, e)))
    }
}

pub struct HttpComparisonService {
    endpoint: JsonEndpoint,
}

impl HttpComparisonService {
    pub fn new(config: HttpServiceConfig) -> Self {
        Self {
            endpoint: JsonEndpoint::new("cheap", config),
        }
    }
}

#[async_trait]
impl ComparisonService for HttpComparisonService {
    async fn similarity(&self, left: &str, right: &str) -> Result<SimilarityReply> {
        let body = serde_json::json!({ "left": left, "right": right });
        let reply: SimilarityReply = self.endpoint.post("similarity", &body).await?;
        if !(0.0..=1.0).contains(&reply.score) {
            return Err(BlendError::service(
                "cheap",
                format!("similarity score {} outside [0, 1]", reply.score),
            ));
        }
        Ok(reply)
    }

    async fn contradiction(
        &self,
        left: &str,
        right: &str,
        rules: Option<&str>,
    ) -> Result<ContradictionReply> {
        let body = serde_json::json!({ "left": left, "right": right, "rules": rules });
        self.endpoint.post("contradiction", &body).await
    }

    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<ClassifyReply> {
        let mut reply: ClassifyReply = self.endpoint.post("classify", &request).await?;
        reply.confidence = reply.confidence.clamp(0.0, 1.0);
        Ok(reply)
    }
}

pub struct HttpMergeService {
    endpoint: JsonEndpoint,
}

impl HttpMergeService {
    pub fn new(config: HttpServiceConfig) -> Self {
        Self {
            endpoint: JsonEndpoint::new("quality", config),
        }
    }
}

#[async_trait]
impl MergeService for HttpMergeService {
    async fn merge(&self, request: MergeRequest<'_>) -> Result<MergeReply> {
        let reply: MergeReply = self.endpoint.post("merge", &request).await?;
        if reply.merged.trim().is_empty() {
            return Err(BlendError::service("quality", "merge returned empty content"));
        }
        Ok(reply)
    }
}

/// 未設定服務端點時使用；所有呼叫都失敗，讓各策略走確定性的退路
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableService;

#[async_trait]
impl ComparisonService for UnavailableService {
    async fn similarity(&self, _left: &str, _right: &str) -> Result<SimilarityReply> {
        Err(BlendError::service("cheap", "no comparison service configured"))
    }

    async fn contradiction(
        &self,
        _left: &str,
        _right: &str,
        _rules: Option<&str>,
    ) -> Result<ContradictionReply> {
        Err(BlendError::service("cheap", "no comparison service configured"))
    }

    async fn classify(&self, _request: ClassifyRequest<'_>) -> Result<ClassifyReply> {
        Err(BlendError::service("cheap", "no comparison service configured"))
    }
}

#[async_trait]
impl MergeService for UnavailableService {
    async fn merge(&self, _request: MergeRequest<'_>) -> Result<MergeReply> {
        Err(BlendError::service("quality", "no merge service configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Domain;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_similarity_request_and_reply() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/similarity")
                .header("authorization", "Bearer secret")
                .json_body(serde_json::json!({"left": "a", "right": "b"}));
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "score": 0.42,
                    "usage": {"input_tokens": 12, "output_tokens": 3}
                }));
        });

        let service = HttpComparisonService::new(
            HttpServiceConfig::new(server.url("")).with_api_key(Some("secret".to_string())),
        );
        let reply = service.similarity("a", "b").await.unwrap();

        mock.assert();
        assert_eq!(reply.score, 0.42);
        assert_eq!(reply.usage.input_tokens, 12);
    }

    #[tokio::test]
    async fn test_server_error_becomes_service_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/classify");
            then.status(503).body("overloaded");
        });

        let service = HttpComparisonService::new(HttpServiceConfig::new(server.url("/")));
        let err = service
            .classify(ClassifyRequest {
                domain: Domain::Prps,
                rules: "rules",
                excerpt: "text",
            })
            .await
            .unwrap_err();

        mock.assert();
        assert!(matches!(err, BlendError::ComparisonServiceError { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_out_of_range_similarity_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/similarity");
            then.status(200).json_body(serde_json::json!({"score": 87.0}));
        });

        let service = HttpComparisonService::new(HttpServiceConfig::new(server.url("")));
        assert!(service.similarity("a", "b").await.is_err());
    }

    #[tokio::test]
    async fn test_merge_reply() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/merge");
            then.status(200)
                .json_body(serde_json::json!({"merged": "# Combined\n", "usage": {"input_tokens": 100, "output_tokens": 40}}));
        });

        let service = HttpMergeService::new(HttpServiceConfig::new(server.url("")));
        let reply = service
            .merge(MergeRequest {
                framework: "# A",
                target: "# B",
                instructions: "combine",
                rules: None,
            })
            .await
            .unwrap();

        mock.assert();
        assert_eq!(reply.merged, "# Combined\n");
        assert_eq!(reply.usage.output_tokens, 40);
    }

    #[tokio::test]
    async fn test_unavailable_service_always_fails() {
        let service = UnavailableService;
        assert!(ComparisonService::similarity(&service, "a", "b").await.is_err());
        assert!(MergeService::merge(
            &service,
            MergeRequest {
                framework: "a",
                target: "b",
                instructions: "",
                rules: None
            }
        )
        .await
        .is_err());
    }
}
