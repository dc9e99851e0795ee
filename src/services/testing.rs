// src/services/testing.rs
//! In-memory model client that replays scripted responses in call order.

use crate::models::ModelProfile;
use crate::services::model_client::{GenerateRequest, ModelClient, ProviderError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub schema: bool,
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub image_count: usize,
}

pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn generate(
        &self,
        _profile: &ModelProfile,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            schema: request.response_schema.is_some(),
            prompt: request.prompt.clone(),
            system_instruction: request.system_instruction.clone(),
            image_count: request.images.len(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Unknown("script exhausted".to_string())))
    }
}
