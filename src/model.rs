//! Item model shared by the selector, backends, and executor.
//!
//! Items are immutable once loaded: the on-disk library (a collaborator)
//! deserializes them, the engine only reads them. Evaluators are a closed
//! sum type so backend dispatch is a plain `match`, not reflection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Dimensions
// =============================================================================

/// Quality axis along which a target is measured independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Functional,
    Robustness,
    Security,
    Fairness,
    Performance,
    Compliance,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Functional,
        Dimension::Robustness,
        Dimension::Security,
        Dimension::Fairness,
        Dimension::Performance,
        Dimension::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Functional => "functional",
            Dimension::Robustness => "robustness",
            Dimension::Security => "security",
            Dimension::Fairness => "fairness",
            Dimension::Performance => "performance",
            Dimension::Compliance => "compliance",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown dimension: {0}")]
pub struct ParseDimensionError(String);

impl FromStr for Dimension {
    type Err = ParseDimensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "functional" => Ok(Dimension::Functional),
            "robustness" => Ok(Dimension::Robustness),
            "security" => Ok(Dimension::Security),
            "fairness" => Ok(Dimension::Fairness),
            "performance" => Ok(Dimension::Performance),
            "compliance" => Ok(Dimension::Compliance),
            other => Err(ParseDimensionError(other.to_string())),
        }
    }
}

// =============================================================================
// IRT parameters
// =============================================================================

/// Three-parameter-logistic item parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemParams {
    /// Discrimination (α). Must be positive; steeper curves separate
    /// nearby abilities more sharply.
    pub discrimination: f64,
    /// Difficulty (β), on the same latent scale as ability.
    pub difficulty: f64,
    /// Guessing floor (γ ∈ [0, 1)): pass probability for a target with
    /// no ability at all.
    #[serde(default)]
    pub guessing: f64,
}

impl ItemParams {
    pub fn new(discrimination: f64, difficulty: f64, guessing: f64) -> Self {
        Self {
            discrimination,
            difficulty,
            guessing,
        }
    }
}

impl Default for ItemParams {
    fn default() -> Self {
        Self {
            discrimination: 1.0,
            difficulty: 0.0,
            guessing: 0.0,
        }
    }
}

// =============================================================================
// Evaluators
// =============================================================================

/// Predicate applied to the target's reply text by the built-in backend.
///
/// `LlmJudge` is currently a heuristic length check; the variant reserves
/// the extension point for a judging backend without changing this contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluator {
    /// Case-insensitive substring match.
    Contains(String),
    /// Negation of `Contains`.
    NotContains(String),
    /// Dotall + case-insensitive regex over fence-stripped text.
    Regex(String),
    /// Negation of `Regex`.
    NotRegex(String),
    /// Passes when the reply is non-empty.
    ScoreThreshold(f64),
    /// Heuristic: passes when the reply exceeds a small length.
    LlmJudge(String),
}

// =============================================================================
// Test input
// =============================================================================

/// Speaker role for a prior conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One prior turn handed to the target ahead of the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Payload handed to the target for one test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Turn>,
}

impl TestInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            history: Vec::new(),
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

// =============================================================================
// Test item
// =============================================================================

/// A calibrated test. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestItem {
    /// Globally unique id.
    pub id: String,
    /// Dimension this item measures; drives session grouping.
    pub dimension: Dimension,
    /// Display/grouping category. Usually equals `dimension`.
    pub category: Dimension,
    #[serde(flatten)]
    pub params: ItemParams,
    /// True while α/β/γ have not been calibrated from field data.
    /// Preliminary items are down-weighted during selection.
    #[serde(default)]
    pub preliminary: bool,
    pub input: TestInput,
    /// Human description of the expected behavior; not consumed by the engine.
    #[serde(default)]
    pub expected_behavior: String,
    #[serde(default)]
    pub evaluators: Vec<Evaluator>,
    /// Backend ids to try first, in order.
    #[serde(default)]
    pub preferred_backends: Vec<String>,
}

impl TestItem {
    /// Minimal constructor used by tests and synthetic pools; real items
    /// come from the library loader.
    pub fn new(id: impl Into<String>, dimension: Dimension, params: ItemParams) -> Self {
        Self {
            id: id.into(),
            dimension,
            category: dimension,
            params,
            preliminary: false,
            input: TestInput::default(),
            expected_behavior: String::new(),
            evaluators: Vec::new(),
            preferred_backends: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: TestInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_evaluators(mut self, evaluators: Vec<Evaluator>) -> Self {
        self.evaluators = evaluators;
        self
    }

    pub fn preliminary(mut self, preliminary: bool) -> Self {
        self.preliminary = preliminary;
        self
    }
}
