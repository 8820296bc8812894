// src/clients.rs
//! HTTP-backed service clients (OpenAI-compatible APIs).
//!
//! These implement the same seams as the in-process doubles in `services`.
//! Construction is via `from_env`, returning `None` when the deployment has
//! no API key so callers can fall back to the local implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::{ServiceError, ServiceResult};
use crate::services::{EmbeddingService, SynthesisClient};
use crate::types::SynthesisMeta;

const API_KEY_ENV: &str = "OPENAI_API_KEY";
const EMBED_MODEL_ENV: &str = "EMBEDDING_MODEL";
const SYNTH_MODEL_ENV: &str = "SYNTHESIS_MODEL";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBED_DIM: usize = 1536;
const DEFAULT_SYNTH_MODEL: &str = "gpt-4o-mini";

fn build_http() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("finnews-intel/0.1")
        .connect_timeout(Duration::from_secs(4))
        .timeout(Duration::from_secs(15))
        .build()
        .expect("reqwest client")
}

/// Remote embedding service over the embeddings API.
pub struct HttpEmbedder {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())?;
        let model =
            std::env::var(EMBED_MODEL_ENV).unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string());
        Some(Self {
            http: build_http(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbedder {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            input: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            data: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct Item {
            embedding: Vec<f32>,
        }

        let resp = self
            .http
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&Req {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| ServiceError::transient("embedding", e))?;

        if !resp.status().is_success() {
            return Err(ServiceError::transient(
                "embedding",
                format!("status {}", resp.status()),
            ));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ServiceError::transient("embedding", e))?;
        body.data
            .into_iter()
            .next()
            .map(|i| i.embedding)
            .ok_or_else(|| ServiceError::transient("embedding", "empty response"))
    }

    fn dimension(&self) -> usize {
        DEFAULT_EMBED_DIM
    }
}

/// Remote answer synthesis over the chat completions API.
pub struct HttpSynthesis {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl HttpSynthesis {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())?;
        let model =
            std::env::var(SYNTH_MODEL_ENV).unwrap_or_else(|_| DEFAULT_SYNTH_MODEL.to_string());
        Some(Self {
            http: build_http(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesis {
    async fn synthesize(
        &self,
        query: &str,
        contexts: &[String],
    ) -> ServiceResult<(String, SynthesisMeta)> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = "You are a financial news analyst. Answer the question using only \
                   the provided articles. Cite which source each claim comes from. \
                   Keep it under five sentences.";
        let user = format!("Question: {query}\n\nArticles:\n{}", contexts.join("\n---\n"));

        let started = Instant::now();
        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: sys,
                    },
                    Msg {
                        role: "user",
                        content: &user,
                    },
                ],
                temperature: 0.2,
                max_tokens: 400,
            })
            .send()
            .await
            .map_err(|e| ServiceError::transient("synthesis", e))?;

        if !resp.status().is_success() {
            return Err(ServiceError::transient(
                "synthesis",
                format!("status {}", resp.status()),
            ));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ServiceError::transient("synthesis", e))?;
        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ServiceError::transient("synthesis", "empty response"))?;

        Ok((
            answer,
            SynthesisMeta {
                model: self.model.clone(),
                provider: "openai".to_string(),
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                sources_used: contexts.len(),
            },
        ))
    }
}
