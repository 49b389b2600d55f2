//! Tools the agent can invoke on behalf of the LLM, plus the registry the
//! execution engine resolves them from.

pub mod engine;
pub mod stats;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ToolConfig;
use crate::error::ToolError;

/// Tool families, used to derive per-call timeouts from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Computation,
    Database,
    Search,
    Chart,
}

impl ToolCategory {
    pub fn timeout(&self, config: &ToolConfig) -> Duration {
        let secs = match self {
            Self::Computation => config.computation_timeout_secs,
            Self::Database => config.database_timeout_secs,
            Self::Search => config.search_timeout_secs,
            Self::Chart => config.chart_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

/// A callable capability. `execute` gets exactly one attempt per request;
/// retry policy belongs to callers. A tool backed by an external service can
/// supply a deterministic `placeholder` the engine substitutes when the real
/// call fails — the engine marks such results as synthetic so they are never
/// mistaken for real ones.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory;

    /// JSON Schema of the accepted parameters.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, action: &str, params: &Value) -> Result<Value, ToolError>;

    /// Deterministic synthetic fallback, if this tool supports degradation.
    fn placeholder(&self, _action: &str, _params: &Value) -> Option<Value> {
        None
    }
}

/// Listing entry used for prompting and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters_schema: Value,
}

/// Registry of available tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the application's built-in tool set. The database tool
    /// starts without a backend (placeholder-only) until the host injects
    /// one via [`ToolRegistry::register`].
    pub fn with_builtin_tools(search_endpoint: &str, search_api_key: &str) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CalculatorTool));
        registry.register(Arc::new(DatabaseTool::new(None)));
        registry.register(Arc::new(SearchTool::new(search_endpoint, search_api_key)));
        registry.register(Arc::new(ChartTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn descriptions(&self) -> Vec<ToolDescription> {
        let mut out: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                category: tool.category(),
                parameters_schema: tool.parameters_schema(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

fn require_f64(params: &Value, key: &str) -> Result<f64, ToolError> {
    params
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::InvalidParams(format!("missing numeric parameter '{}'", key)))
}

// ==================== Calculator ====================

/// Pure-local health arithmetic: no network, no fallback needed.
pub struct CalculatorTool;

#[async_trait]
impl AgentTool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Computes health metrics: BMI with weight category, daily calorie \
        budget (Mifflin-St Jeor), and target exercise heart-rate zones."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Computation
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "height_cm": { "type": "number" },
                "weight_kg": { "type": "number" },
                "age": { "type": "number" },
                "sex": { "type": "string", "enum": ["male", "female"] },
                "activity_level": {
                    "type": "string",
                    "enum": ["sedentary", "light", "moderate", "active"]
                }
            }
        })
    }

    async fn execute(&self, action: &str, params: &Value) -> Result<Value, ToolError> {
        match action {
            "health_metrics" => {
                let height_m = require_f64(params, "height_cm")? / 100.0;
                let weight = require_f64(params, "weight_kg")?;
                if height_m <= 0.0 || weight <= 0.0 {
                    return Err(ToolError::InvalidParams(
                        "height and weight must be positive".into(),
                    ));
                }
                let bmi = weight / (height_m * height_m);
                // WS/T 428 adult cutoffs
                let bucket = if bmi < 18.5 {
                    "underweight"
                } else if bmi < 24.0 {
                    "normal"
                } else if bmi < 28.0 {
                    "overweight"
                } else {
                    "obese"
                };
                Ok(json!({ "bmi": (bmi * 10.0).round() / 10.0, "category": bucket }))
            }
            "calorie_budget" => {
                let weight = require_f64(params, "weight_kg")?;
                let height = require_f64(params, "height_cm")?;
                let age = require_f64(params, "age")?;
                let sex = params.get("sex").and_then(Value::as_str).unwrap_or("female");
                let activity =
                    params.get("activity_level").and_then(Value::as_str).unwrap_or("light");

                let bmr = 10.0 * weight + 6.25 * height - 5.0 * age
                    + if sex == "male" { 5.0 } else { -161.0 };
                let multiplier = match activity {
                    "sedentary" => 1.2,
                    "light" => 1.375,
                    "moderate" => 1.55,
                    "active" => 1.725,
                    other => {
                        return Err(ToolError::InvalidParams(format!(
                            "unknown activity_level '{}'",
                            other
                        )))
                    }
                };
                Ok(json!({
                    "bmr_kcal": bmr.round(),
                    "daily_budget_kcal": (bmr * multiplier).round(),
                }))
            }
            "exercise_load" => {
                let age = require_f64(params, "age")?;
                let resting =
                    params.get("resting_heart_rate").and_then(Value::as_f64).unwrap_or(70.0);
                let max_hr = 220.0 - age;
                // Karvonen 50–70% reserve band for moderate training
                let low = resting + 0.5 * (max_hr - resting);
                let high = resting + 0.7 * (max_hr - resting);
                Ok(json!({
                    "target_heart_rate": { "low": low.round(), "high": high.round() },
                    "weekly_moderate_minutes": 150,
                }))
            }
            other => Err(ToolError::UnknownAction {
                tool: self.name().to_string(),
                action: other.to_string(),
            }),
        }
    }
}

// ==================== Database ====================

/// Host-supplied backend for health-record queries. The web layer owns the
/// actual store; this crate only sees the boundary.
#[async_trait]
pub trait HealthRecordBackend: Send + Sync {
    async fn query(&self, action: &str, params: &Value) -> Result<Value, ToolError>;
}

/// Health-record lookups with a deterministic synthetic fallback when no
/// backend is wired up or the real query fails.
pub struct DatabaseTool {
    backend: Option<Arc<dyn HealthRecordBackend>>,
}

impl DatabaseTool {
    pub fn new(backend: Option<Arc<dyn HealthRecordBackend>>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl AgentTool for DatabaseTool {
    fn name(&self) -> &str {
        "database"
    }

    fn description(&self) -> &str {
        "Queries the user's stored health records: profile, recent metrics, \
        and measurement history."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Database
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "metric": { "type": "string" },
                "days": { "type": "integer" }
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, action: &str, params: &Value) -> Result<Value, ToolError> {
        match &self.backend {
            Some(backend) => backend.query(action, params).await,
            None => Err(ToolError::Unavailable("no health-record backend configured".into())),
        }
    }

    fn placeholder(&self, action: &str, _params: &Value) -> Option<Value> {
        Some(json!({
            "synthetic": true,
            "note": "health-record store unreachable; generic reference profile substituted",
            "action": action,
            "profile": {
                "height_cm": 170,
                "weight_kg": 65,
                "age": 35,
                "activity_level": "light"
            }
        }))
    }
}

// ==================== Search ====================

/// External web search with a clearly-marked degraded fallback.
pub struct SearchTool {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl SearchTool {
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl AgentTool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Searches the web for up-to-date health information and guidelines."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "default": 5 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, action: &str, params: &Value) -> Result<Value, ToolError> {
        if action != "web_search" {
            return Err(ToolError::UnknownAction {
                tool: self.name().to_string(),
                action: action.to_string(),
            });
        }
        if self.endpoint.is_empty() {
            return Err(ToolError::Unavailable("search endpoint not configured".into()));
        }
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidParams("missing 'query'".into()))?;
        let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(5).to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("limit", limit.as_str())])
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ToolError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::Backend(format!("search API HTTP {}", response.status())));
        }
        response.json::<Value>().await.map_err(|e| ToolError::Backend(e.to_string()))
    }

    fn placeholder(&self, _action: &str, params: &Value) -> Option<Value> {
        let query = params.get("query").and_then(Value::as_str).unwrap_or_default();
        Some(json!({
            "synthetic": true,
            "note": "live search unavailable; no external results were fetched",
            "query": query,
            "results": []
        }))
    }
}

// ==================== Chart ====================

/// Builds a renderable chart specification from series data. Pure local —
/// the frontend does the actual drawing.
pub struct ChartTool;

#[async_trait]
impl AgentTool for ChartTool {
    fn name(&self) -> &str {
        "chart"
    }

    fn description(&self) -> &str {
        "Produces a chart specification (line or bar) from labeled series \
        data, e.g. a weight trend over recent weeks."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Chart
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "kind": { "type": "string", "enum": ["line", "bar"] },
                "series": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "label": { "type": "string" },
                            "value": { "type": "number" }
                        }
                    }
                }
            },
            "required": ["series"]
        })
    }

    async fn execute(&self, action: &str, params: &Value) -> Result<Value, ToolError> {
        if action != "render_summary" {
            return Err(ToolError::UnknownAction {
                tool: self.name().to_string(),
                action: action.to_string(),
            });
        }
        let series = params
            .get("series")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidParams("missing 'series' array".into()))?;
        let kind = params.get("kind").and_then(Value::as_str).unwrap_or("line");
        if !matches!(kind, "line" | "bar") {
            return Err(ToolError::InvalidParams(format!("unsupported chart kind '{}'", kind)));
        }

        Ok(json!({
            "chart": {
                "kind": kind,
                "title": params.get("title").and_then(Value::as_str).unwrap_or(""),
                "points": series,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bmi_computation_and_category() {
        let result = CalculatorTool
            .execute("health_metrics", &json!({ "height_cm": 175.0, "weight_kg": 82.0 }))
            .await
            .unwrap();
        assert_eq!(result["bmi"], json!(26.8));
        assert_eq!(result["category"], json!("overweight"));
    }

    #[tokio::test]
    async fn calorie_budget_uses_activity_multiplier() {
        let params = json!({
            "height_cm": 170.0, "weight_kg": 65.0, "age": 30.0,
            "sex": "male", "activity_level": "moderate"
        });
        let result = CalculatorTool.execute("calorie_budget", &params).await.unwrap();
        // BMR = 10*65 + 6.25*170 - 5*30 + 5 = 1567.5
        assert_eq!(result["bmr_kcal"], json!(1568.0));
        assert_eq!(result["daily_budget_kcal"], json!((1567.5f64 * 1.55).round()));
    }

    #[tokio::test]
    async fn calculator_rejects_bad_input() {
        let err = CalculatorTool
            .execute("health_metrics", &json!({ "height_cm": 175.0 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));

        let err = CalculatorTool.execute("divide", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownAction { .. }));
    }

    #[tokio::test]
    async fn database_without_backend_is_unavailable_but_has_placeholder() {
        let tool = DatabaseTool::new(None);
        let err = tool.execute("fetch_profile", &json!({ "user_id": "u1" })).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));

        let fallback = tool.placeholder("fetch_profile", &json!({})).unwrap();
        assert_eq!(fallback["synthetic"], json!(true));
    }

    #[tokio::test]
    async fn chart_builds_spec_locally() {
        let params = json!({
            "title": "体重趋势",
            "kind": "line",
            "series": [
                { "label": "week 1", "value": 66.2 },
                { "label": "week 2", "value": 65.8 }
            ]
        });
        let result = ChartTool.execute("render_summary", &params).await.unwrap();
        assert_eq!(result["chart"]["kind"], json!("line"));
        assert_eq!(result["chart"]["points"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn registry_lists_builtin_tools() {
        let registry = ToolRegistry::with_builtin_tools("", "");
        assert_eq!(registry.list(), vec!["calculator", "chart", "database", "search"]);
        assert!(registry.get("calculator").is_some());
        assert!(registry.get("weather").is_none());
        assert_eq!(registry.descriptions().len(), 4);
    }
}
