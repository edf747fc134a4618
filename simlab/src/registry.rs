//! String-keyed factories for every component a run configuration can name.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::{
    domain::SimulationDomain,
    error::{Result, SimlabError},
    metrics::{Metric, RecommendationSuccessRatio, SuccessRate},
    participant::{wrapper_agent::DEFAULT_AGENT_URI, Agent, UserSimulator, WrapperAgent, WrapperUserSimulator},
    storage::Storage,
    task::Task,
};

pub type AgentFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn Agent>> + Send + Sync>;
pub type UserSimulatorFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn UserSimulator>> + Send + Sync>;
pub type MetricFactory = Box<dyn Fn(&Value) -> Result<Box<dyn Metric>> + Send + Sync>;
pub type DomainFactory = Box<dyn Fn(&Value) -> Result<SimulationDomain> + Send + Sync>;
pub type TaskFactory =
    Box<dyn Fn(&Value, &ComponentRegistry, &Storage) -> Result<Task> + Send + Sync>;

pub const DEFAULT_USER_SIMULATOR_URI: &str = "http://localhost:7001";

#[derive(Default)]
pub struct ComponentRegistry {
    agents: HashMap<String, AgentFactory>,
    user_simulators: HashMap<String, UserSimulatorFactory>,
    tasks: HashMap<String, TaskFactory>,
    metrics: HashMap<String, MetricFactory>,
    domains: HashMap<String, DomainFactory>,
}

fn lookup<'a, F>(factories: &'a HashMap<String, F>, category: &'static str, class_name: &str) -> Result<&'a F> {
    factories
        .get(class_name)
        .ok_or_else(|| SimlabError::UnknownComponent {
            category,
            class_name: class_name.to_string(),
        })
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SimlabError::MissingKey(key.to_string()))
}

fn optional_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in component.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_agent(
            "WrapperAgent",
            Box::new(|args: &Value| -> Result<Arc<dyn Agent>> {
                let mut agent = WrapperAgent::new(
                    required_str(args, "id")?,
                    optional_str(args, "uri").unwrap_or(DEFAULT_AGENT_URI),
                );
                if let Some(stop_intent) = optional_str(args, "stop_intent") {
                    agent = agent.with_stop_intent(stop_intent);
                }
                Ok(Arc::new(agent))
            }),
        );

        registry.register_user_simulator(
            "WrapperUserSimulator",
            Box::new(|args: &Value| -> Result<Arc<dyn UserSimulator>> {
                Ok(Arc::new(WrapperUserSimulator::new(
                    required_str(args, "id")?,
                    optional_str(args, "uri").unwrap_or(DEFAULT_USER_SIMULATOR_URI),
                )))
            }),
        );

        registry.register_metric(
            "SuccessRate",
            Box::new(|args: &Value| -> Result<Box<dyn Metric>> {
                Ok(Box::new(match optional_str(args, "name") {
                    Some(name) => SuccessRate::with_name(name),
                    None => SuccessRate::new(),
                }))
            }),
        );

        registry.register_metric(
            "RecommendationSuccessRatio",
            Box::new(|args: &Value| -> Result<Box<dyn Metric>> {
                let metric: RecommendationSuccessRatio = if args.is_null() {
                    RecommendationSuccessRatio::default()
                } else {
                    serde_json::from_value(args.clone()).map_err(|e| {
                        SimlabError::configuration(format!("Invalid RecommendationSuccessRatio arguments: {e}"))
                    })?
                };
                Ok(Box::new(metric))
            }),
        );

        registry.register_domain(
            "SimulationDomain",
            Box::new(|args: &Value| SimulationDomain::load(required_str(args, "config_file")?)),
        );

        registry.register_task("Task", Box::new(build_task));

        registry
    }

    pub fn register_agent(&mut self, class_name: impl Into<String>, factory: AgentFactory) {
        self.agents.insert(class_name.into(), factory);
    }

    pub fn register_user_simulator(&mut self, class_name: impl Into<String>, factory: UserSimulatorFactory) {
        self.user_simulators.insert(class_name.into(), factory);
    }

    pub fn register_metric(&mut self, class_name: impl Into<String>, factory: MetricFactory) {
        self.metrics.insert(class_name.into(), factory);
    }

    pub fn register_domain(&mut self, class_name: impl Into<String>, factory: DomainFactory) {
        self.domains.insert(class_name.into(), factory);
    }

    pub fn register_task(&mut self, class_name: impl Into<String>, factory: TaskFactory) {
        self.tasks.insert(class_name.into(), factory);
    }

    pub fn create_agent(&self, class_name: &str, arguments: &Value) -> Result<Arc<dyn Agent>> {
        let factory = lookup(&self.agents, "agent", class_name)?;
        factory(arguments)
    }

    pub fn create_user_simulator(&self, class_name: &str, arguments: &Value) -> Result<Arc<dyn UserSimulator>> {
        let factory = lookup(&self.user_simulators, "user_simulator", class_name)?;
        factory(arguments)
    }

    pub fn create_metric(&self, class_name: &str, arguments: &Value) -> Result<Box<dyn Metric>> {
        let factory = lookup(&self.metrics, "metric", class_name)?;
        factory(arguments)
    }

    pub fn create_domain(&self, class_name: &str, arguments: &Value) -> Result<SimulationDomain> {
        let factory = lookup(&self.domains, "domain", class_name)?;
        factory(arguments)
    }

    pub fn create_task(&self, class_name: &str, arguments: &Value, storage: &Storage) -> Result<Task> {
        let factory = lookup(&self.tasks, "task", class_name)?;
        factory(arguments, self, storage)
    }
}

/// `{name, batch_id, domain?, metrics: [{class_name, arguments?}]}`
///
/// `domain` is either a path to a domain file or a nested
/// `{class_name?, arguments: {config_file}}` component.
fn build_task(args: &Value, registry: &ComponentRegistry, storage: &Storage) -> Result<Task> {
    let name = required_str(args, "name")?;
    let batch_id = required_str(args, "batch_id")?;

    let domain = match args.get("domain") {
        None | Some(Value::Null) => None,
        Some(Value::String(path)) => Some(SimulationDomain::load(path)?),
        Some(component) => {
            let class_name = optional_str(component, "class_name").unwrap_or("SimulationDomain");
            let arguments = component.get("arguments").unwrap_or(component);
            Some(registry.create_domain(class_name, arguments)?)
        }
    };

    let metrics = args
        .get("metrics")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|metric| {
            let class_name = required_str(metric, "class_name")?;
            registry.create_metric(class_name, metric.get("arguments").unwrap_or(&Value::Null))
        })
        .collect::<Result<Vec<_>>>()?;

    Task::new(name, domain, metrics, storage, batch_id)
}
