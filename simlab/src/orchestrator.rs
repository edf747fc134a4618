//! Run orchestration: pairs every agent with every user simulator, generates
//! dialogues for each information need, and stores one evaluation summary per
//! pair.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::{
    container::{ContainerRuntime, RunningContainer},
    dialogue,
    error::{Result, SimlabError},
    participant::{api, Agent, Participant, UserSimulator},
    platform::SimulationPlatform,
    run_configuration::{AgentConfiguration, RunConfiguration, UserSimulatorConfiguration},
    settings::SimulationConfig,
    statistics::MetricStatistics,
    storage::{EvaluationSummary, RunRecord, RunStatus, Storage},
    task::Task,
};

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub record: RunRecord,
    pub output_dir: PathBuf,
    pub summaries: Vec<EvaluationSummary>,
    /// `(agent_id, user_id)` of pairs skipped because their transcript existed.
    pub skipped_pairs: Vec<(String, String)>,
}

/// Per-run knobs: settings defaults overridden by the run's `kwargs`.
#[derive(Debug, Clone)]
struct RunOptions {
    repetitions: u32,
    resume: bool,
    fail_fast: bool,
}

pub struct Orchestrator {
    config: SimulationConfig,
    storage: Storage,
    runtime: Arc<dyn ContainerRuntime>,
    client: reqwest::Client,
}

/// `{output_root}/dialogue_export_{task}/{batch_id}`
pub fn output_dir(output_root: &Path, task: &Task) -> PathBuf {
    output_root
        .join(format!("dialogue_export_{}", task.name))
        .join(&task.batch_id)
}

impl Orchestrator {
    pub fn new(config: SimulationConfig, storage: Storage, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            storage,
            runtime,
            client: reqwest::Client::new(),
        }
    }

    /// Executes the run and records its status. Container cleanup runs
    /// whatever the outcome.
    #[instrument(skip_all, fields(run = %configuration.name))]
    pub async fn run(&self, configuration: &RunConfiguration) -> Result<RunReport> {
        let mut record = RunRecord::started(&configuration.name);

        let outcome = match self.storage.upsert_run_record(&record) {
            Ok(()) => {
                info!("Run started");
                self.execute(configuration, &mut record).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.runtime.cleanup().await {
            warn!("Container cleanup failed: {}", e);
        }

        match outcome {
            Ok(report) => {
                let RunReport {
                    output_dir,
                    summaries,
                    skipped_pairs,
                    ..
                } = report;

                let error = if summaries.is_empty() && !record.failed_pairs.is_empty() {
                    Some(format!("All {} pairs failed", record.failed_pairs.len()))
                } else {
                    None
                };
                record.finish(error);
                self.storage.upsert_run_record(&record)?;

                match record.status {
                    RunStatus::Failed => error!(error = ?record.error, "Run failed"),
                    _ => info!(pairs = summaries.len(), skipped = skipped_pairs.len(), "Run completed"),
                }

                Ok(RunReport {
                    record,
                    output_dir,
                    summaries,
                    skipped_pairs,
                })
            }
            Err(e) => {
                error!("Run failed: {}", e);
                record.finish(Some(e.to_string()));
                if let Err(write_error) = self.storage.upsert_run_record(&record) {
                    warn!("Failed to record run failure: {}", write_error);
                }
                Err(e)
            }
        }
    }

    fn options(&self, configuration: &RunConfiguration) -> Result<RunOptions> {
        Ok(RunOptions {
            repetitions: configuration.repetitions(self.config.repetitions)?,
            resume: configuration.resume(self.config.resume),
            fail_fast: configuration.fail_fast(self.config.fail_fast),
        })
    }

    async fn execute(&self, configuration: &RunConfiguration, record: &mut RunRecord) -> Result<RunReport> {
        let options = self.options(configuration)?;
        let output_dir = output_dir(&self.config.output_root, &configuration.task);
        let mut summaries = Vec::new();
        let mut skipped_pairs = Vec::new();

        for agent in &configuration.agents {
            for user in &configuration.user_simulators {
                let agent_id = agent.participant.id();
                let user_id = user.participant.id();

                let transcript = dialogue::transcript_path(&output_dir, agent_id, user_id);
                if options.resume && transcript.exists() {
                    info!(agent_id, user_id, "Transcript exists, skipping pair");
                    skipped_pairs.push((agent_id.to_string(), user_id.to_string()));
                    continue;
                }

                match self.run_pair(configuration, agent, user, &output_dir, &options).await {
                    Ok(summary) => summaries.push(summary),
                    Err(e) if !options.fail_fast => {
                        error!(agent_id, user_id, "Pair failed: {}", e);
                        record.failed_pairs.push(format!("{agent_id}_{user_id}: {e}"));
                        self.storage.upsert_run_record(record)?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(RunReport {
            record: record.clone(),
            output_dir,
            summaries,
            skipped_pairs,
        })
    }

    #[instrument(skip_all, fields(agent_id = %agent.participant.id(), user_id = %user.participant.id()))]
    async fn run_pair(
        &self,
        configuration: &RunConfiguration,
        agent: &AgentConfiguration,
        user: &UserSimulatorConfiguration,
        output_dir: &Path,
        options: &RunOptions,
    ) -> Result<EvaluationSummary> {
        let mut containers = Vec::new();

        let simulated = self
            .simulate_pair(configuration, agent, user, output_dir, options, &mut containers)
            .await;

        for container in &containers {
            if let Err(e) = self.runtime.stop(container).await {
                warn!(container_id = %container.container_id, "Failed to stop container: {}", e);
            }
        }
        simulated?;

        let agent_id = agent.participant.id();
        let user_id = user.participant.id();
        let transcript = dialogue::transcript_path(output_dir, agent_id, user_id);
        let dialogues = if configuration.task.information_needs().is_empty() && !transcript.exists() {
            warn!("Information need batch is empty, nothing to evaluate");
            Vec::new()
        } else {
            dialogue::read_transcript(&transcript).await?
        };
        let scores = configuration.task.evaluation(&dialogues)?;

        let summary = EvaluationSummary {
            run_name: configuration.name.clone(),
            public: configuration.public,
            agent_id: agent_id.to_string(),
            user_simulator_id: user_id.to_string(),
            task_id: configuration.task.name.clone(),
            information_need_batch_id: configuration.task.batch_id.clone(),
            metrics: summarize(scores),
            created_at: Utc::now(),
        };
        self.storage.insert_evaluation_summary(&summary)?;
        info!(dialogues = dialogues.len(), "Pair evaluated");
        Ok(summary)
    }

    async fn simulate_pair(
        &self,
        configuration: &RunConfiguration,
        agent: &AgentConfiguration,
        user: &UserSimulatorConfiguration,
        output_dir: &Path,
        options: &RunOptions,
        containers: &mut Vec<RunningContainer>,
    ) -> Result<()> {
        self.start_participant(agent.participant.as_ref(), agent.image.as_deref(), &agent.parameters, containers)
            .await?;
        self.start_participant(user.participant.as_ref(), user.image.as_deref(), &user.parameters, containers)
            .await?;

        generate_dialogues(
            &configuration.task,
            Arc::clone(&agent.participant),
            Arc::clone(&user.participant),
            output_dir,
            options.repetitions,
            self.config.max_utterances,
        )
        .await
    }

    /// Starts the participant's container when it ships as an image, waits
    /// until it answers, and pushes its custom parameters.
    async fn start_participant<P: Participant + ?Sized>(
        &self,
        participant: &P,
        image: Option<&str>,
        parameters: &Map<String, Value>,
        containers: &mut Vec<RunningContainer>,
    ) -> Result<()> {
        let id = participant.id();

        if let Some(image) = image {
            let container = self
                .runtime
                .start(image, id)
                .await
                .map_err(|e| SimlabError::startup(id, e))?;
            participant.rebind(&container.base_uri());
            containers.push(container);
        }

        if let Some(uri) = participant.endpoint() {
            api::wait_for_participant(
                &self.client,
                &uri,
                self.config.readiness_retries,
                self.config.readiness_delay(),
            )
            .await
            .map_err(|e| SimlabError::startup(id, e))?;

            api::configure_participant(&self.client, &uri, id, parameters)
                .await
                .map_err(|e| SimlabError::startup(id, e))?;
        }

        info!(participant_id = id, "Participant ready");
        Ok(())
    }
}

/// Replays every information need `repetitions` times through the platform.
pub async fn generate_dialogues(
    task: &Task,
    agent: Arc<dyn Agent>,
    user: Arc<dyn UserSimulator>,
    output_dir: &Path,
    repetitions: u32,
    max_utterances: Option<usize>,
) -> Result<()> {
    let mut platform = SimulationPlatform::new().with_max_utterances(max_utterances);
    let user_id = user.id().to_string();

    for round in 1..=repetitions {
        for need in task.information_needs() {
            user.set_information_need(need).await?;
            platform
                .connect(&user_id, Arc::clone(&user), Arc::clone(&agent), output_dir)
                .await?;
            platform.disconnect(&user_id, agent.id())?;
        }
        info!(round, repetitions, "Repetition finished");
    }
    Ok(())
}

/// Descriptive statistics per metric. Metrics without scores are left out.
pub fn summarize(scores: BTreeMap<String, Vec<f64>>) -> BTreeMap<String, MetricStatistics> {
    scores
        .into_iter()
        .filter_map(|(metric, values)| {
            MetricStatistics::from_values(values).map(|statistics| (metric, statistics))
        })
        .collect()
}
