//! Keyword-table intent classification.
//!
//! Deliberately a transparent heuristic, not an ML classifier: every match
//! is explainable as "these keywords appeared", there is no training-data
//! dependency, and misfires are debuggable by reading the table. Each intent
//! is an enum variant carrying its own keyword list, tool plan, and
//! execution mode, validated once at startup.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tools::engine::dependency_order;

/// How a workflow's tool calls are scheduled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// All tools launch concurrently; one failure never cancels a sibling.
    Parallel,
    /// Dependency-resolved order; dependents of a failed tool are skipped.
    Sequential,
    /// Dependency order, but execution stops at the first failure and the
    /// remaining tools are skipped.
    Conditional,
    /// Parallel when the plan has no dependency edges, Sequential otherwise.
    Adaptive,
}

/// The fixed set of request categories the agent recognizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    HealthAnalysis,
    NutritionPlanning,
    ExercisePlanning,
    ComprehensiveAssessment,
    KnowledgeQuery,
    /// No keyword matched anything: plain conversation, no tools.
    GeneralChat,
}

/// One tool in an intent's plan. Parameters are bound per request by the
/// engine; the plan only fixes tool, action, and ordering edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPlanEntry {
    pub tool: String,
    pub action: String,
    pub depends_on: Vec<String>,
}

impl ToolPlanEntry {
    fn new(tool: &str, action: &str, depends_on: &[&str]) -> Self {
        Self {
            tool: tool.to_string(),
            action: action.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Static configuration for one intent.
#[derive(Debug, Clone)]
pub struct IntentProfile {
    pub kind: IntentKind,
    pub keywords: Vec<String>,
    pub tools: Vec<ToolPlanEntry>,
    pub mode: ExecutionMode,
    /// Whether answering needs a knowledge-base lookup.
    pub use_retrieval: bool,
}

/// Classification result for one message. Recomputed per request, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMatch {
    pub kind: IntentKind,
    /// matched keywords / total keywords for the winning intent, in [0, 1].
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
    pub tools: Vec<ToolPlanEntry>,
    pub mode: ExecutionMode,
    pub use_retrieval: bool,
}

impl IntentMatch {
    fn general_chat() -> Self {
        Self {
            kind: IntentKind::GeneralChat,
            confidence: 0.0,
            matched_keywords: Vec::new(),
            tools: Vec::new(),
            mode: ExecutionMode::Parallel,
            use_retrieval: false,
        }
    }
}

pub struct IntentClassifier {
    profiles: Vec<IntentProfile>,
}

impl IntentClassifier {
    /// Build a classifier, rejecting broken profiles up front: an intent
    /// with no keywords can never match, and a cyclic tool plan can never
    /// be scheduled — both are configuration bugs, not runtime conditions.
    pub fn new(profiles: Vec<IntentProfile>) -> Result<Self, ConfigError> {
        for profile in &profiles {
            if profile.keywords.is_empty() {
                return Err(ConfigError(format!(
                    "intent {:?} has an empty keyword list",
                    profile.kind
                )));
            }
            if profile.keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(ConfigError(format!(
                    "intent {:?} has a blank keyword",
                    profile.kind
                )));
            }
            let edges: Vec<(String, Vec<String>)> = profile
                .tools
                .iter()
                .map(|t| (t.tool.clone(), t.depends_on.clone()))
                .collect();
            dependency_order(&edges).map_err(|e| {
                ConfigError(format!("intent {:?} tool plan: {}", profile.kind, e))
            })?;
        }
        Ok(Self { profiles })
    }

    pub fn with_builtin_intents() -> Result<Self, ConfigError> {
        Self::new(builtin_profiles())
    }

    /// Score `message` against every intent and return the best match.
    /// Case-insensitive substring matching; intents with zero matched
    /// keywords are never candidates.
    pub fn classify(&self, message: &str) -> IntentMatch {
        let haystack = message.to_lowercase();

        let mut candidates: Vec<IntentMatch> = Vec::new();
        for profile in &self.profiles {
            let matched: Vec<String> = profile
                .keywords
                .iter()
                .filter(|k| haystack.contains(&k.to_lowercase()))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }
            let confidence = matched.len() as f32 / profile.keywords.len() as f32;
            candidates.push(IntentMatch {
                kind: profile.kind,
                confidence,
                matched_keywords: matched,
                tools: profile.tools.clone(),
                mode: profile.mode,
                use_retrieval: profile.use_retrieval,
            });
        }

        // Highest confidence wins; equal scores keep table order.
        candidates.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });

        match candidates.into_iter().next() {
            Some(best) => {
                tracing::debug!(
                    intent = ?best.kind,
                    confidence = best.confidence,
                    matched = ?best.matched_keywords,
                    "intent classified"
                );
                best
            }
            None => IntentMatch::general_chat(),
        }
    }
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// The application's fixed intent table.
fn builtin_profiles() -> Vec<IntentProfile> {
    vec![
        IntentProfile {
            kind: IntentKind::HealthAnalysis,
            keywords: keywords(&["分析", "数据", "统计", "趋势", "BMI", "体重"]),
            tools: vec![
                ToolPlanEntry::new("calculator", "health_metrics", &[]),
                ToolPlanEntry::new("database", "query_metrics", &[]),
            ],
            mode: ExecutionMode::Parallel,
            use_retrieval: false,
        },
        IntentProfile {
            kind: IntentKind::NutritionPlanning,
            keywords: keywords(&["营养", "饮食", "食谱", "热量", "卡路里"]),
            tools: vec![
                ToolPlanEntry::new("database", "fetch_profile", &[]),
                ToolPlanEntry::new("calculator", "calorie_budget", &["database"]),
            ],
            mode: ExecutionMode::Sequential,
            use_retrieval: true,
        },
        IntentProfile {
            kind: IntentKind::ExercisePlanning,
            keywords: keywords(&["运动", "计划", "锻炼"]),
            tools: vec![
                ToolPlanEntry::new("database", "fetch_profile", &[]),
                ToolPlanEntry::new("calculator", "exercise_load", &["database"]),
            ],
            mode: ExecutionMode::Sequential,
            use_retrieval: false,
        },
        IntentProfile {
            kind: IntentKind::ComprehensiveAssessment,
            keywords: keywords(&["综合", "评估", "全面", "体检", "健康状况"]),
            tools: vec![
                ToolPlanEntry::new("calculator", "health_metrics", &[]),
                ToolPlanEntry::new("database", "query_metrics", &[]),
                ToolPlanEntry::new("chart", "render_summary", &[]),
            ],
            mode: ExecutionMode::Parallel,
            use_retrieval: true,
        },
        IntentProfile {
            kind: IntentKind::KnowledgeQuery,
            keywords: keywords(&["什么是", "为什么", "如何", "怎么办", "科普"]),
            tools: vec![ToolPlanEntry::new("search", "web_search", &[])],
            mode: ExecutionMode::Conditional,
            use_retrieval: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::with_builtin_intents().unwrap()
    }

    #[test]
    fn bmi_exercise_message_picks_exercise_planning() {
        // "BMI" matches health_analysis 1/6; "运动" and "计划" match
        // exercise_planning 2/3 — the higher confidence wins.
        let result = classifier().classify("帮我计算BMI并制定减肥的运动计划");
        assert_eq!(result.kind, IntentKind::ExercisePlanning);
        assert!((result.confidence - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(result.matched_keywords, vec!["运动", "计划"]);
        assert_eq!(result.mode, ExecutionMode::Sequential);
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let result = classifier().classify("please chart my bmi trend");
        assert_eq!(result.kind, IntentKind::HealthAnalysis);
        assert!((result.confidence - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn no_match_falls_back_to_general_chat() {
        let result = classifier().classify("你好，今天天气不错");
        assert_eq!(result.kind, IntentKind::GeneralChat);
        assert_eq!(result.confidence, 0.0);
        assert!(result.tools.is_empty());
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        for message in [
            "分析我的数据统计趋势，关注BMI和体重",
            "什么是高血压",
            "运动",
            "完全无关的话",
        ] {
            let result = classifier().classify(message);
            assert!((0.0..=1.0).contains(&result.confidence));
            assert_eq!(result.confidence == 0.0, result.matched_keywords.is_empty());
        }
    }

    #[test]
    fn full_keyword_coverage_reaches_confidence_one() {
        let result = classifier().classify("请分析数据、统计、趋势，算BMI和体重");
        assert_eq!(result.kind, IntentKind::HealthAnalysis);
        assert!((result.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_keyword_list_is_rejected_at_startup() {
        let profiles = vec![IntentProfile {
            kind: IntentKind::HealthAnalysis,
            keywords: vec![],
            tools: vec![],
            mode: ExecutionMode::Parallel,
            use_retrieval: false,
        }];
        assert!(IntentClassifier::new(profiles).is_err());
    }

    #[test]
    fn cyclic_tool_plan_is_rejected_at_startup() {
        let profiles = vec![IntentProfile {
            kind: IntentKind::HealthAnalysis,
            keywords: keywords(&["分析"]),
            tools: vec![
                ToolPlanEntry::new("a", "x", &["b"]),
                ToolPlanEntry::new("b", "y", &["a"]),
            ],
            mode: ExecutionMode::Sequential,
            use_retrieval: false,
        }];
        assert!(IntentClassifier::new(profiles).is_err());
    }
}
