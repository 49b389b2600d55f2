//! Deterministic prompt construction.
//!
//! Given identical inputs the assembled message list is byte-identical —
//! tool results render in schedule order, passages in rank order, history
//! bounded to the trailing window. No randomness anywhere.

use crate::intent::{IntentKind, IntentMatch};
use crate::llm::ChatMessage;
use crate::tools::engine::{ToolPayload, ToolStatus, WorkflowResult};
use crate::types::{ChatTurn, RetrievedPassage};

const SYSTEM_INSTRUCTIONS: &str = "You are a careful health-advice assistant. \
Ground your answers in the provided tool results and reference passages when \
they are present. Synthetic tool results are degraded fallbacks — treat them \
as unavailable data, not as user measurements. Advise consulting a clinician \
for diagnoses. Answer in the user's language.";

pub struct PromptAssembler {
    history_window: usize,
}

impl PromptAssembler {
    pub fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    /// Merge everything known about this request into an ordered message
    /// list: system block (instructions + tool summary + passages), the
    /// trailing history window, then the user message.
    pub fn assemble(
        &self,
        user_message: &str,
        intent: &IntentMatch,
        workflow: Option<&WorkflowResult>,
        passages: &[RetrievedPassage],
        history: &[ChatTurn],
    ) -> Vec<ChatMessage> {
        let mut system = String::from(SYSTEM_INSTRUCTIONS);

        if intent.kind != IntentKind::GeneralChat {
            system.push_str(&format!(
                "\n\nDetected request category: {:?} (confidence {:.2}).",
                intent.kind, intent.confidence
            ));
        }

        if let Some(workflow) = workflow {
            system.push_str("\n\nTool results:");
            for result in workflow.ordered_results() {
                match (&result.status, &result.payload) {
                    (ToolStatus::Success, Some(ToolPayload::Real(value))) => {
                        system.push_str(&format!("\n- {} [ok]: {}", result.tool, value));
                    }
                    (ToolStatus::Success, Some(ToolPayload::Placeholder(value))) => {
                        system.push_str(&format!(
                            "\n- {} [synthetic fallback, not real data]: {}",
                            result.tool, value
                        ));
                    }
                    (status, _) => {
                        let reason = result.error.as_deref().unwrap_or("no detail");
                        system.push_str(&format!(
                            "\n- {} [{}]: {}",
                            result.tool,
                            status_label(*status),
                            reason
                        ));
                    }
                }
            }
        }

        if !passages.is_empty() {
            system.push_str("\n\nReference passages:");
            for (i, passage) in passages.iter().enumerate() {
                let source = passage
                    .metadata
                    .get("source")
                    .map(String::as_str)
                    .unwrap_or("unknown source");
                system.push_str(&format!(
                    "\n[{}] ({}, score {:.3}) {}",
                    i + 1,
                    source,
                    passage.score,
                    passage.text
                ));
            }
        }

        let mut messages = vec![ChatMessage::system(system)];

        // only the most recent turns, oldest first
        let start = history.len().saturating_sub(self.history_window);
        for turn in &history[start..] {
            match turn.role.as_str() {
                "assistant" => messages.push(ChatMessage::assistant(&turn.content)),
                _ => messages.push(ChatMessage::user(&turn.content)),
            }
        }

        messages.push(ChatMessage::user(user_message));
        messages
    }
}

fn status_label(status: ToolStatus) -> &'static str {
    match status {
        ToolStatus::Success => "ok",
        ToolStatus::Failed => "failed",
        ToolStatus::TimedOut => "timed out",
        ToolStatus::Skipped => "skipped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::ExecutionMode;
    use crate::tools::engine::ToolResult;
    use serde_json::json;
    use std::collections::HashMap;

    fn intent(kind: IntentKind, confidence: f32) -> IntentMatch {
        IntentMatch {
            kind,
            confidence,
            matched_keywords: vec![],
            tools: vec![],
            mode: ExecutionMode::Parallel,
            use_retrieval: false,
        }
    }

    fn workflow() -> WorkflowResult {
        let mut results = HashMap::new();
        results.insert(
            "calculator".to_string(),
            ToolResult {
                tool: "calculator".to_string(),
                status: ToolStatus::Success,
                payload: Some(ToolPayload::Real(json!({ "bmi": 22.5 }))),
                error: None,
                execution_time_ms: 3,
            },
        );
        results.insert(
            "database".to_string(),
            ToolResult {
                tool: "database".to_string(),
                status: ToolStatus::Success,
                payload: Some(ToolPayload::Placeholder(json!({ "synthetic": true }))),
                error: Some("backend unreachable".to_string()),
                execution_time_ms: 12,
            },
        );
        results.insert(
            "search".to_string(),
            ToolResult {
                tool: "search".to_string(),
                status: ToolStatus::TimedOut,
                payload: None,
                error: Some("timed out".to_string()),
                execution_time_ms: 15000,
            },
        );
        WorkflowResult {
            results,
            invocation_order: vec![
                "calculator".to_string(),
                "database".to_string(),
                "search".to_string(),
            ],
            intent: intent(IntentKind::HealthAnalysis, 0.5),
        }
    }

    fn passage(text: &str, score: f32) -> RetrievedPassage {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), "/docs/guide.pdf".to_string());
        RetrievedPassage { text: text.to_string(), score, metadata }
    }

    #[test]
    fn identical_inputs_assemble_identically() {
        let assembler = PromptAssembler::new(6);
        let intent = intent(IntentKind::HealthAnalysis, 0.5);
        let workflow = workflow();
        let passages = vec![passage("低盐饮食有助于控制血压。", 0.91)];
        let history = vec![ChatTurn::user("你好"), ChatTurn::assistant("你好，有什么可以帮你？")];

        let a = assembler.assemble("我的BMI正常吗", &intent, Some(&workflow), &passages, &history);
        let b = assembler.assemble("我的BMI正常吗", &intent, Some(&workflow), &passages, &history);
        assert_eq!(a, b);
    }

    #[test]
    fn system_block_reports_every_tool_status() {
        let assembler = PromptAssembler::new(6);
        let intent = intent(IntentKind::HealthAnalysis, 0.5);
        let messages = assembler.assemble("query", &intent, Some(&workflow()), &[], &[]);

        let system = &messages[0].content;
        assert!(system.contains("calculator [ok]"));
        assert!(system.contains("database [synthetic fallback"));
        assert!(system.contains("search [timed out]"));
    }

    #[test]
    fn history_is_bounded_to_recent_turns() {
        let assembler = PromptAssembler::new(2);
        let intent = intent(IntentKind::GeneralChat, 0.0);
        let history: Vec<ChatTurn> =
            (0..10).map(|i| ChatTurn::user(format!("turn {}", i))).collect();

        let messages = assembler.assemble("latest", &intent, None, &[], &history);
        // system + 2 history turns + user message
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "turn 8");
        assert_eq!(messages[2].content, "turn 9");
        assert_eq!(messages[3].content, "latest");
    }

    #[test]
    fn passages_render_in_rank_order() {
        let assembler = PromptAssembler::new(6);
        let intent = intent(IntentKind::KnowledgeQuery, 0.2);
        let passages = vec![passage("first", 0.9), passage("second", 0.7)];
        let messages = assembler.assemble("什么是高血压", &intent, None, &passages, &[]);

        let system = &messages[0].content;
        let first = system.find("[1]").unwrap();
        let second = system.find("[2]").unwrap();
        assert!(first < second);
        assert!(system.contains("/docs/guide.pdf"));
    }

    #[test]
    fn bare_chat_still_produces_system_and_user() {
        let assembler = PromptAssembler::new(6);
        let intent = intent(IntentKind::GeneralChat, 0.0);
        let messages = assembler.assemble("你好", &intent, None, &[], &[]);
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].content.contains("Tool results"));
    }
}
