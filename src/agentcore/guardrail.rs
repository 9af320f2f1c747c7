//! Guardrail pipeline: pure validators applied to strings at the engine
//! boundary.
//!
//! Input and output guardrails are distinct traits — not two enum variants of
//! one trait — so the type system prevents wiring an output check where an
//! input check belongs (and vice versa). [`CompositeGuardrail`] composes
//! either kind with `All`/`Any`/`First` aggregation.
//!
//! # Example
//!
//! ```rust
//! use agentcore::guardrail::{CompositeGuardrail, InputGuardrail, LengthCheck, ValidationMode};
//!
//! let pipeline = CompositeGuardrail::new(
//!     vec![Box::new(LengthCheck::new(1, 500))],
//!     ValidationMode::All,
//! );
//! assert!(pipeline.check("hello").is_ok());
//! assert!(pipeline.check("").is_err());
//! ```

use crate::error::GuardrailError;
use crate::llm::{CompletionOptions, LlmClient};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

/// A validator applied to the *input* side of the engine boundary (the user
/// message before a step is accepted).
pub trait InputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, value: &str) -> Result<(), GuardrailError>;
}

/// A validator applied to the *output* side of the engine boundary (the
/// final assistant content once status reaches `Complete`).
pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, value: &str) -> Result<(), GuardrailError>;
}

/// Async-capable counterpart to [`InputGuardrail`], for validators whose
/// check itself requires an async capability (calling an LLM, a remote
/// moderation service, ...). `CompositeGuardrail` stays synchronous-only —
/// mixing a blocking `fn check` and an `async fn check` behind the same
/// trait object would force every sync guardrail to pay for a boxed future
/// it never needs — so the engine runs this pipeline as a second, independent
/// pass alongside the sync one, at the same boundary (§4.3/§4.7).
#[async_trait]
pub trait AsyncInputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, value: &str) -> Result<(), GuardrailError>;
}

/// Async-capable counterpart to [`OutputGuardrail`]; see [`AsyncInputGuardrail`].
#[async_trait]
pub trait AsyncOutputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, value: &str) -> Result<(), GuardrailError>;
}

/// How a [`CompositeGuardrail`] aggregates its constituents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Every constituent must succeed; on failure, return every failure in
    /// input order (see testable property 9).
    All,
    /// First success wins, earliest in input order; if all fail, aggregate
    /// every failure.
    Any,
    /// Only the first constituent runs; its result is the composite result.
    First,
}

/// A named sequence of guardrails plus an aggregation mode.
///
/// Generic over which guardrail flavor it composes so one type serves both
/// `Vec<Box<dyn InputGuardrail>>` and `Vec<Box<dyn OutputGuardrail>>`
/// pipelines without duplicating the aggregation logic.
pub struct CompositeGuardrail<G: ?Sized> {
    guardrails: Vec<Box<G>>,
    mode: ValidationMode,
}

impl<G: ?Sized> CompositeGuardrail<G> {
    pub fn new(guardrails: Vec<Box<G>>, mode: ValidationMode) -> Self {
        Self { guardrails, mode }
    }
}

impl CompositeGuardrail<dyn InputGuardrail> {
    pub fn check(&self, value: &str) -> Result<(), GuardrailError> {
        run(&self.guardrails, self.mode, |g| g.check(value))
    }
}

impl CompositeGuardrail<dyn OutputGuardrail> {
    pub fn check(&self, value: &str) -> Result<(), GuardrailError> {
        run(&self.guardrails, self.mode, |g| g.check(value))
    }
}

fn run<G: ?Sized>(
    guardrails: &[Box<G>],
    mode: ValidationMode,
    check_one: impl Fn(&G) -> Result<(), GuardrailError>,
) -> Result<(), GuardrailError> {
    match mode {
        ValidationMode::All => {
            let failures: Vec<GuardrailError> = guardrails
                .iter()
                .filter_map(|g| check_one(g).err())
                .collect();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(GuardrailError::Aggregate(failures))
            }
        }
        ValidationMode::Any => {
            let mut failures = Vec::new();
            for g in guardrails {
                match check_one(g) {
                    Ok(()) => return Ok(()),
                    Err(e) => failures.push(e),
                }
            }
            if guardrails.is_empty() {
                Ok(())
            } else {
                Err(GuardrailError::Aggregate(failures))
            }
        }
        ValidationMode::First => match guardrails.first() {
            Some(g) => check_one(g),
            None => Ok(()),
        },
    }
}

/// Rejects strings outside `[min, max]` characters (inclusive).
pub struct LengthCheck {
    min: usize,
    max: usize,
}

impl LengthCheck {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }
}

impl InputGuardrail for LengthCheck {
    fn name(&self) -> &str {
        "length_check"
    }

    fn check(&self, value: &str) -> Result<(), GuardrailError> {
        let len = value.chars().count();
        if len < self.min || len > self.max {
            return Err(GuardrailError::Rejected {
                guardrail: self.name().to_string(),
                message: format!(
                    "length {} is outside allowed range [{}, {}]",
                    len, self.min, self.max
                ),
            });
        }
        Ok(())
    }
}

impl OutputGuardrail for LengthCheck {
    fn name(&self) -> &str {
        "length_check"
    }

    fn check(&self, value: &str) -> Result<(), GuardrailError> {
        InputGuardrail::check(self, value)
    }
}

/// Rejects strings that do not match a regular expression.
pub struct RegexValidator {
    pattern: Regex,
}

impl RegexValidator {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl InputGuardrail for RegexValidator {
    fn name(&self) -> &str {
        "regex_validator"
    }

    fn check(&self, value: &str) -> Result<(), GuardrailError> {
        if self.pattern.is_match(value) {
            Ok(())
        } else {
            Err(GuardrailError::Rejected {
                guardrail: self.name().to_string(),
                message: format!("value does not match /{}/", self.pattern.as_str()),
            })
        }
    }
}

impl OutputGuardrail for RegexValidator {
    fn name(&self) -> &str {
        "regex_validator"
    }

    fn check(&self, value: &str) -> Result<(), GuardrailError> {
        InputGuardrail::check(self, value)
    }
}

/// Rejects strings that are not valid JSON, optionally checking them against
/// a parameter schema via [`crate::schema`].
pub struct JsonValidator {
    schema: Option<serde_json::Value>,
}

impl JsonValidator {
    pub fn new() -> Self {
        Self { schema: None }
    }

    pub fn with_schema(schema: serde_json::Value) -> Self {
        Self { schema: Some(schema) }
    }

    fn check_impl(&self, value: &str) -> Result<(), GuardrailError> {
        let parsed: serde_json::Value = serde_json::from_str(value).map_err(|e| GuardrailError::Rejected {
            guardrail: "json_validator".to_string(),
            message: format!("invalid JSON: {}", e),
        })?;
        if let Some(schema) = &self.schema {
            crate::schema::validate(schema, &parsed).map_err(|e| GuardrailError::Rejected {
                guardrail: "json_validator".to_string(),
                message: format!("{}: {}", e.path, e.message),
            })?;
        }
        Ok(())
    }
}

impl Default for JsonValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl InputGuardrail for JsonValidator {
    fn name(&self) -> &str {
        "json_validator"
    }

    fn check(&self, value: &str) -> Result<(), GuardrailError> {
        self.check_impl(value)
    }
}

impl OutputGuardrail for JsonValidator {
    fn name(&self) -> &str {
        "json_validator"
    }

    fn check(&self, value: &str) -> Result<(), GuardrailError> {
        self.check_impl(value)
    }
}

/// Delegates validation to an LLM: scores the input against an evaluation
/// prompt and passes iff the score meets `threshold`.
///
/// The judge's completion content must parse as a bare float or a
/// `{"score": f32}` JSON object; any other shape, or a score outside
/// `[0, 1]`, fails with `JudgeProtocolError`. This wire shape is not pinned
/// by anything upstream — it is implementation-defined but stable within a
/// version, the same latitude afforded to tool-error serialisation.
pub struct LlmAsJudgeGuardrail {
    client: Arc<dyn LlmClient>,
    evaluation_prompt: String,
    threshold: f32,
    judge_model: Option<String>,
}

impl LlmAsJudgeGuardrail {
    pub fn new(client: Arc<dyn LlmClient>, evaluation_prompt: impl Into<String>, threshold: f32) -> Self {
        Self {
            client,
            evaluation_prompt: evaluation_prompt.into(),
            threshold,
            judge_model: None,
        }
    }

    pub fn with_judge_model(mut self, model: impl Into<String>) -> Self {
        self.judge_model = Some(model.into());
        self
    }

    fn parse_score(content: &str) -> Option<f32> {
        if let Ok(score) = content.trim().parse::<f32>() {
            return Some(score);
        }
        let parsed: serde_json::Value = serde_json::from_str(content).ok()?;
        parsed.get("score")?.as_f64().map(|v| v as f32)
    }

    pub async fn check(&self, value: &str) -> Result<(), GuardrailError> {
        let prompt = format!("{}\n\nInput:\n{}", self.evaluation_prompt, value);
        let mut options = CompletionOptions::default();
        options.model = self.judge_model.clone();
        let messages = vec![crate::message::Message::user(prompt)];
        let completion = self
            .client
            .complete(&messages, &options, &[])
            .await
            .map_err(|e| GuardrailError::JudgeProtocolError(e.to_string()))?;

        let score = Self::parse_score(&completion.content)
            .ok_or_else(|| GuardrailError::JudgeProtocolError(format!(
                "judge response was not a numeric score: {:?}",
                completion.content
            )))?;

        if !(0.0..=1.0).contains(&score) {
            return Err(GuardrailError::JudgeProtocolError(format!(
                "judge score {} is outside [0, 1]",
                score
            )));
        }

        if score >= self.threshold {
            Ok(())
        } else {
            Err(GuardrailError::Rejected {
                guardrail: "llm_as_judge".to_string(),
                message: format!("score {} below threshold {}", score, self.threshold),
            })
        }
    }
}

#[async_trait]
impl AsyncInputGuardrail for LlmAsJudgeGuardrail {
    fn name(&self) -> &str {
        "llm_as_judge"
    }

    async fn check(&self, value: &str) -> Result<(), GuardrailError> {
        LlmAsJudgeGuardrail::check(self, value).await
    }
}

#[async_trait]
impl AsyncOutputGuardrail for LlmAsJudgeGuardrail {
    fn name(&self) -> &str {
        "llm_as_judge"
    }

    async fn check(&self, value: &str) -> Result<(), GuardrailError> {
        LlmAsJudgeGuardrail::check(self, value).await
    }
}
