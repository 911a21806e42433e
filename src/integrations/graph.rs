//! HTTP knowledge-graph client

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{Episode, IntegrationError, KnowledgeGraph, Result};

/// Posts episodes as JSON to `{endpoint}/episodes`.
#[derive(Debug, Clone)]
pub struct HttpKnowledgeGraph {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpKnowledgeGraph {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl KnowledgeGraph for HttpKnowledgeGraph {
    async fn add_episode(&self, episode: &Episode) -> Result<()> {
        let mut request = self
            .client
            .post(format!("{}/episodes", self.endpoint))
            .json(episode);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IntegrationError::Backend(format!(
                "graph returned HTTP {}",
                status.as_u16()
            )));
        }

        // Some backends answer 200 with an error status in the body.
        let body = response.bytes().await?;
        if let Ok(reply) = serde_json::from_slice::<EpisodeResponse>(&body) {
            if reply.status.as_deref().is_some_and(|s| s != "success") {
                return Err(IntegrationError::Backend(
                    reply.error.unwrap_or_else(|| "unknown error".to_string()),
                ));
            }
        }

        tracing::info!(episode = %episode.name, "Added episode to knowledge graph");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn episode() -> Episode {
        Episode {
            name: "crawl_1_abcdef12".to_string(),
            episode_body: "content".to_string(),
            source_description: "Crawled content from https://example.com".to_string(),
            reference_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn posts_episode_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/episodes"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({ "name": "crawl_1_abcdef12" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "success" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let graph = HttpKnowledgeGraph::new(
            Client::new(),
            format!("{}/", server.uri()),
            Some("secret".to_string()),
        );
        graph.add_episode(&episode()).await.unwrap();
    }

    #[tokio::test]
    async fn error_status_in_body_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "status": "error", "error": "graph offline" }),
            ))
            .mount(&server)
            .await;

        let graph = HttpKnowledgeGraph::new(Client::new(), server.uri(), None);
        let err = graph.add_episode(&episode()).await.unwrap_err();
        assert_eq!(err, IntegrationError::Backend("graph offline".to_string()));
    }

    #[tokio::test]
    async fn http_failure_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let graph = HttpKnowledgeGraph::new(Client::new(), server.uri(), None);
        assert!(matches!(
            graph.add_episode(&episode()).await,
            Err(IntegrationError::Backend(_))
        ));
    }
}
