//! The layered transformation pipeline.
//!
//! Three layers (lower, mid, upper) each get a `run` step followed by a `test`
//! step, then a whole-project `test` and a `docs generate` step, chained
//! linearly:
//!
//! ```text
//! lower_run -> lower_test -> mid_run -> mid_test -> upper_run -> upper_test
//!   -> project_test -> docs_generate
//! ```
//!
//! Commands are opaque strings of the form `<prefix> <verb>`, e.g.
//! `docker exec dbt_airflow_project-dbt-1 dbt run --models bronze`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Edge, RetryBudget, TaskGraph, TaskNode, TriggerRule};

pub const DEFAULT_PIPELINE_ID: &str = "dbt_transform";
pub const DEFAULT_COMMAND_PREFIX: &str = "docker exec dbt_airflow_project-dbt-1 dbt";
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Lower,
    Mid,
    Upper,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Lower, Layer::Mid, Layer::Upper];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Lower => "lower",
            Layer::Mid => "mid",
            Layer::Upper => "upper",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry defaults differ per kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Run,
    Test,
    ProjectTest,
    Docs,
}

/// One invocation of the transformation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCommand {
    Run(Layer),
    Test(Layer),
    TestProject,
    DocsGenerate,
}

impl ToolCommand {
    pub fn task_id(&self) -> String {
        match self {
            ToolCommand::Run(layer) => format!("{layer}_run"),
            ToolCommand::Test(layer) => format!("{layer}_test"),
            ToolCommand::TestProject => "project_test".to_string(),
            ToolCommand::DocsGenerate => "docs_generate".to_string(),
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            ToolCommand::Run(_) => StepKind::Run,
            ToolCommand::Test(_) => StepKind::Test,
            ToolCommand::TestProject => StepKind::ProjectTest,
            ToolCommand::DocsGenerate => StepKind::Docs,
        }
    }

    /// Tool arguments, without the prefix.
    pub fn verb(&self, models: &LayerModels) -> String {
        match self {
            ToolCommand::Run(layer) => format!("run --models {}", models.model(*layer)),
            ToolCommand::Test(layer) => format!("test --models {}", models.model(*layer)),
            ToolCommand::TestProject => "test".to_string(),
            ToolCommand::DocsGenerate => "docs generate".to_string(),
        }
    }
}

/// Model selector used for each layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerModels {
    pub lower: String,
    pub mid: String,
    pub upper: String,
}

impl Default for LayerModels {
    fn default() -> Self {
        Self {
            lower: "bronze".to_string(),
            mid: "silver".to_string(),
            upper: "gold".to_string(),
        }
    }
}

impl LayerModels {
    pub fn model(&self, layer: Layer) -> &str {
        match layer {
            Layer::Lower => &self.lower,
            Layer::Mid => &self.mid,
            Layer::Upper => &self.upper,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDefaults {
    pub run: RetryBudget,
    pub test: RetryBudget,
    pub project_test: RetryBudget,
    pub docs: RetryBudget,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            run: RetryBudget::from_retries(2, DEFAULT_RETRY_DELAY),
            test: RetryBudget::from_retries(1, DEFAULT_RETRY_DELAY),
            project_test: RetryBudget::from_retries(0, DEFAULT_RETRY_DELAY),
            docs: RetryBudget::from_retries(0, DEFAULT_RETRY_DELAY),
        }
    }
}

impl RetryDefaults {
    pub fn for_kind(&self, kind: StepKind) -> RetryBudget {
        match kind {
            StepKind::Run => self.run,
            StepKind::Test => self.test,
            StepKind::ProjectTest => self.project_test,
            StepKind::Docs => self.docs,
        }
    }

    pub fn set(&mut self, kind: StepKind, budget: RetryBudget) {
        match kind {
            StepKind::Run => self.run = budget,
            StepKind::Test => self.test = budget,
            StepKind::ProjectTest => self.project_test = budget,
            StepKind::Docs => self.docs = budget,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub id: String,
    pub command_prefix: String,
    pub models: LayerModels,
    pub retries: RetryDefaults,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self {
            id: DEFAULT_PIPELINE_ID.to_string(),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            models: LayerModels::default(),
            retries: RetryDefaults::default(),
        }
    }
}

impl PipelineSpec {
    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    pub fn with_budget(mut self, kind: StepKind, budget: RetryBudget) -> Self {
        self.retries.set(kind, budget);
        self
    }

    /// Steps in execution order.
    pub fn steps() -> Vec<ToolCommand> {
        let mut steps = Vec::with_capacity(Layer::ALL.len() * 2 + 2);
        for layer in Layer::ALL {
            steps.push(ToolCommand::Run(layer));
            steps.push(ToolCommand::Test(layer));
        }
        steps.push(ToolCommand::TestProject);
        steps.push(ToolCommand::DocsGenerate);
        steps
    }

    pub fn command_for(&self, step: ToolCommand) -> String {
        let verb = step.verb(&self.models);
        let prefix = self.command_prefix.trim();
        if prefix.is_empty() {
            verb
        } else {
            format!("{prefix} {verb}")
        }
    }

    /// Every step gates on full upstream success.
    pub fn nodes(&self) -> Vec<TaskNode> {
        Self::steps()
            .into_iter()
            .map(|step| {
                TaskNode::new(step.task_id(), self.command_for(step))
                    .with_retry(self.retries.for_kind(step.kind()))
                    .with_trigger_rule(TriggerRule::AllSuccess)
            })
            .collect()
    }

    /// Linear chain over [`PipelineSpec::steps`].
    pub fn edges() -> Vec<Edge> {
        Self::steps()
            .windows(2)
            .map(|pair| Edge::new(pair[0].task_id(), pair[1].task_id()))
            .collect()
    }

    pub fn build_graph(&self) -> Result<TaskGraph, ConfigError> {
        TaskGraph::build(self.id.clone(), self.nodes(), Self::edges())
    }
}
