//! Per-node-type execution.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::ExecutionEvent;
use nodeflow_core::node::{
    AgentNodeConfig, ExtractTextConfig, FormatterConfig, GenerativeAiConfig, NodeKind, NodeRecord,
};
use nodeflow_core::traits::{EventSink, TextGenerator};
use nodeflow_core::types::GenerationRequest;

use crate::agent::AgentController;
use crate::cancellable;
use crate::context::RunContext;
use crate::formatter;

/// Executes single nodes against the run context.
pub struct NodeDispatcher {
    generator: Arc<dyn TextGenerator>,
    agent: AgentController,
}

impl NodeDispatcher {
    pub fn new(generator: Arc<dyn TextGenerator>, agent: AgentController) -> Self {
        Self { generator, agent }
    }

    pub fn agent(&self) -> &AgentController {
        &self.agent
    }

    /// Execute `node` and return its terminal event.
    ///
    /// Reads the context but never writes it. Agent nodes report progress
    /// to `sink`; every other kind emits nothing here. Errors are meant to
    /// be caught at the node boundary by the caller.
    pub async fn dispatch(
        &self,
        node: &NodeRecord,
        ctx: &RunContext,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<ExecutionEvent> {
        match &node.kind {
            NodeKind::ExtractText => {
                let config: ExtractTextConfig = node.typed_config()?;
                Ok(ExecutionEvent::success(node, document_context(&config)))
            }
            NodeKind::GenerativeAi => {
                let config: GenerativeAiConfig = node.typed_config()?;
                let text = cancellable(cancel, self.generator.generate(question_request(&config)))
                    .await?;
                Ok(ExecutionEvent::success(node, text))
            }
            NodeKind::Formatter => {
                let config: FormatterConfig = node.typed_config()?;
                let input = ctx.latest().unwrap_or_default();
                debug!(
                    node_id = %node.id,
                    operation = %config.operation,
                    chars = input.chars().count(),
                    "Formatting"
                );
                Ok(ExecutionEvent::success(node, formatter::apply(input, &config)))
            }
            NodeKind::Agent => {
                let config: AgentNodeConfig = node.typed_config()?;
                let outcome = self
                    .agent
                    .run(node, config, ctx.latest(), sink, cancel)
                    .await?;
                Ok(outcome.into_event(node))
            }
            NodeKind::Unknown(node_type) => Err(NodeflowError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node_type.clone(),
            }),
        }
    }
}

/// Context text for an uploaded document.
fn document_context(config: &ExtractTextConfig) -> String {
    let mut text = String::from(
        "The following is a document uploaded by the user.\n\
         Use it as reference when answering.\n\n",
    );
    text.push_str(&format!("File name:\n{}\n", config.file_name));
    if let Some(file_type) = &config.file_type {
        text.push_str(&format!("File type: {}\n", file_type));
    }
    if let Some(size) = config.file_size {
        text.push_str(&format!("File size: {} bytes\n", size));
    }
    text.push_str(&format!("File contents:\n{}\n", config.extracted_text));
    text
}

fn question_request(config: &GenerativeAiConfig) -> GenerationRequest {
    let prompt = format!(
        "The following is a question entered by the user.\n\
         Answer it as concisely as possible.\n\n\
         Question:\n{}",
        config.prompt
    );
    let request = GenerationRequest::new(prompt)
        .with_model(&config.model)
        .with_temperature(config.temperature);
    match config.max_tokens {
        Some(max) => request.with_max_tokens(max),
        None => request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::config::AgentConfig;
    use nodeflow_core::persona::default_personas;
    use nodeflow_test_utils::{
        agent_node, extract_text_node, formatter_node, generative_node, Call, MockGenerator,
        RecordingSink,
    };
    use serde_json::json;

    fn dispatcher(gen: Arc<MockGenerator>) -> NodeDispatcher {
        let agent = AgentController::new(gen.clone(), default_personas(), AgentConfig::default());
        NodeDispatcher::new(gen, agent)
    }

    async fn dispatch(d: &NodeDispatcher, node: &NodeRecord, ctx: &RunContext) -> Result<ExecutionEvent> {
        d.dispatch(node, ctx, &RecordingSink::new(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_extract_text_embeds_name_and_contents() {
        let d = dispatcher(Arc::new(MockGenerator::new()));
        let event = dispatch(&d, &extract_text_node("n1", "a.txt", "hello"), &RunContext::new())
            .await
            .unwrap();
        assert!(event.result.contains("a.txt"));
        assert!(event.result.contains("hello"));
    }

    #[tokio::test]
    async fn test_extract_text_with_both_text_keys() {
        let d = dispatcher(Arc::new(MockGenerator::new()));
        let node = NodeRecord::new(
            "n1",
            NodeKind::ExtractText,
            json!({"file_name": "a.txt", "extracted_text": "hello", "extract_text": "hello"}),
        );
        let event = dispatch(&d, &node, &RunContext::new()).await.unwrap();
        assert_eq!(event.status, nodeflow_core::EventStatus::Success);
        assert!(event.result.contains("a.txt") && event.result.contains("hello"));
    }

    #[tokio::test]
    async fn test_formatter_handles_multibyte_input() {
        let d = dispatcher(Arc::new(MockGenerator::new()));
        let mut ctx = RunContext::new();
        ctx.record("n1", "ｶﾞｲﾄﾞ ABC");
        let node = NodeRecord::new(
            "n2",
            NodeKind::Formatter,
            json!({"operation": "to_full_width", "ascii": false}),
        );
        let event = dispatch(&d, &node, &ctx).await.unwrap();
        assert_eq!(event.result, "ガイド ABC");
    }

    #[tokio::test]
    async fn test_extract_text_optional_metadata() {
        let d = dispatcher(Arc::new(MockGenerator::new()));
        let node = NodeRecord::new(
            "n1",
            NodeKind::ExtractText,
            json!({"file_name": "r.pdf", "extract_text": "body", "file_type": "pdf", "file_size": 12}),
        );
        let event = dispatch(&d, &node, &RunContext::new()).await.unwrap();
        assert!(event.result.contains("File type: pdf"));
        assert!(event.result.contains("12 bytes"));
        assert!(event.result.contains("body"));
    }

    #[tokio::test]
    async fn test_extract_text_missing_contents_is_config_error() {
        let d = dispatcher(Arc::new(MockGenerator::new()));
        let node = NodeRecord::new("n1", NodeKind::ExtractText, json!({"file_name": "a.txt"}));
        let err = dispatch(&d, &node, &RunContext::new()).await.unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("n1"));
    }

    #[tokio::test]
    async fn test_generative_wraps_prompt_and_passes_options() {
        let gen = Arc::new(MockGenerator::new().on_text("capital of France", "Paris"));
        let d = dispatcher(gen.clone());
        let node = NodeRecord::new(
            "n1",
            NodeKind::GenerativeAi,
            json!({"prompt": "What is the capital of France?", "model": "gpt-4o", "temperature": 0.2, "max_tokens": 50}),
        );
        let event = dispatch(&d, &node, &RunContext::new()).await.unwrap();
        assert_eq!(event.result, "Paris");

        match &gen.calls()[0] {
            Call::Text(request) => {
                assert!(request.prompt.starts_with("The following is a question"));
                assert!(request.prompt.ends_with("What is the capital of France?"));
                assert_eq!(request.model.as_deref(), Some("gpt-4o"));
                assert_eq!(request.temperature, Some(0.2));
                assert_eq!(request.max_tokens, Some(50));
            }
            other => panic!("Expected a text call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generative_defaults() {
        let gen = Arc::new(MockGenerator::new());
        let d = dispatcher(gen.clone());
        dispatch(&d, &generative_node("n1", "hi"), &RunContext::new())
            .await
            .unwrap();
        match &gen.calls()[0] {
            Call::Text(request) => {
                assert_eq!(request.model.as_deref(), Some("gpt-4o-mini"));
                assert_eq!(request.max_tokens, None);
            }
            other => panic!("Expected a text call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_formatter_reads_latest_result() {
        let d = dispatcher(Arc::new(MockGenerator::new()));
        let mut ctx = RunContext::new();
        ctx.record("n1", "first");
        ctx.record("n2", "abc");
        let event = dispatch(&d, &formatter_node("n3", "to_upper"), &ctx).await.unwrap();
        assert_eq!(event.result, "ABC");

        let event = dispatch(&d, &formatter_node("n4", "noop_x"), &ctx).await.unwrap();
        assert_eq!(event.result, "abc");
    }

    #[tokio::test]
    async fn test_formatter_without_context_is_empty() {
        let d = dispatcher(Arc::new(MockGenerator::new()));
        let event = dispatch(&d, &formatter_node("n1", "to_upper"), &RunContext::new())
            .await
            .unwrap();
        assert_eq!(event.result, "");
    }

    #[tokio::test]
    async fn test_agent_receives_previous_text() {
        let gen = Arc::new(MockGenerator::new().on_structured("task plan", json!({"tasks": []})));
        let d = dispatcher(gen.clone());
        let mut ctx = RunContext::new();
        ctx.record("n1", "earlier output");
        let event = dispatch(&d, &agent_node("n2", "Summarize"), &ctx).await.unwrap();
        assert_eq!(event.status, nodeflow_core::EventStatus::MaxIterations);
        assert!(gen.calls()[0].prompt().contains("earlier output"));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let d = dispatcher(Arc::new(MockGenerator::new()));
        let node = NodeRecord::new("n1", NodeKind::Unknown("ocr".into()), json!({}));
        match dispatch(&d, &node, &RunContext::new()).await {
            Err(NodeflowError::UnknownNodeType { node_id, node_type }) => {
                assert_eq!(node_id, "n1");
                assert_eq!(node_type, "ocr");
            }
            other => panic!("Expected UnknownNodeType, got {:?}", other),
        }
    }
}
