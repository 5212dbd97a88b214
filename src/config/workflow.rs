//! Workflow definition documents.
//!
//! A definition is an ordered list of steps plus metadata, parsed from a
//! YAML document. Definitions are immutable once loaded and re-parsed
//! fresh for every run.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::str::FromStr;

/// A named, ordered workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique name used for lookup. Falls back to the file stem when the
    /// document omits it.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    pub steps: Vec<StepDefinition>,
}

/// One unit of work: an agent call, a prompt call, or a shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within a definition; referenced by later conditions.
    pub id: String,

    /// Named persona document to converse with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Named prompt template to render and send.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Shell command to execute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Built-in source name, exact `{{var}}` reference, or literal text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// Variable name to store this step's output under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_as: Option<String>,

    /// Substring that must appear in the output for the step to pass.
    /// When unset, shell and prompt steps pass unless execution fails;
    /// agent steps fall back to the default pass marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,

    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Boolean expression over prior step outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Timeout in seconds, applied to shell execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The resolved kind of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction<'a> {
    Agent(&'a str),
    Prompt(&'a str),
    Shell(&'a str),
}

impl StepDefinition {
    /// The step's action, when exactly one of `agent`/`prompt`/`shell`
    /// is declared.
    pub fn action(&self) -> Option<StepAction<'_>> {
        match (&self.agent, &self.prompt, &self.shell) {
            (Some(a), None, None) => Some(StepAction::Agent(a)),
            (None, Some(p), None) => Some(StepAction::Prompt(p)),
            (None, None, Some(s)) => Some(StepAction::Shell(s)),
            _ => None,
        }
    }
}

impl WorkflowDefinition {
    /// Structural validation applied at load time. Documents that fail
    /// are excluded from discovery.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err("step with empty id".to_string());
            }
            if !seen.insert(step.id.as_str()) {
                return Err(format!("duplicate step id '{}'", step.id));
            }
            if step.action().is_none() {
                return Err(format!(
                    "step '{}' must declare exactly one of agent, prompt, or shell",
                    step.id
                ));
            }
        }
        Ok(())
    }
}

/// Per-step directive controlling what happens when the step fails.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the run at this step.
    #[default]
    Abort,
    /// Record the failure and move on.
    Continue,
    /// Re-dispatch up to `max_attempts` extra times, then abort.
    Retry { max_attempts: u32 },
}

impl FailurePolicy {
    /// Extra dispatch attempts granted beyond the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            FailurePolicy::Retry { max_attempts } => *max_attempts,
            _ => 0,
        }
    }

    /// Whether an exhausted failure aborts the run.
    pub fn aborts_run(&self) -> bool {
        !matches!(self, FailurePolicy::Continue)
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "abort" => return Ok(FailurePolicy::Abort),
            "continue" => return Ok(FailurePolicy::Continue),
            _ => {}
        }

        let inner = s
            .strip_prefix("retry(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| format!("invalid failure policy '{s}'"))?;
        let count = inner
            .trim()
            .strip_prefix("max:")
            .ok_or_else(|| format!("invalid failure policy '{s}'"))?;
        let max_attempts = count
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid retry count in '{s}'"))?;

        Ok(FailurePolicy::Retry { max_attempts })
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Continue => write!(f, "continue"),
            FailurePolicy::Retry { max_attempts } => write!(f, "retry(max: {max_attempts})"),
        }
    }
}

impl Serialize for FailurePolicy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FailurePolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
