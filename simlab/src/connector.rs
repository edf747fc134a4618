//! Drives one conversation between an agent and a user simulator.
//!
//! The connector owns the canonical transcript. Each registered utterance is
//! appended and then handed to the other participant, whose answer is
//! registered in turn, until one side emits the agent's stop intent. On
//! finish the transcript is appended to the pair's transcript file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::{
    dialogue::{self, Dialogue, DialogueRole, Utterance},
    error::{Result, SimlabError},
    participant::{Agent, Participant, UserSimulator},
};

/// Consecutive empty turns from one participant after which the dialogue is
/// abandoned. Degraded remote turns (error status, malformed body) arrive as
/// empty utterances.
pub const MAX_CONSECUTIVE_EMPTY_TURNS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    NotStarted,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Continue,
    Stop,
}

pub struct DialogueConnector {
    agent: Arc<dyn Agent>,
    user: Arc<dyn UserSimulator>,
    output_dir: PathBuf,
    conversation_id: String,
    state: ConnectorState,
    utterances: Vec<Utterance>,
    metadata: Map<String, Value>,
    goodbye_sent: bool,
    max_utterances: Option<usize>,
    empty_turns: usize,
}

impl DialogueConnector {
    pub fn new(agent: Arc<dyn Agent>, user: Arc<dyn UserSimulator>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent,
            user,
            output_dir: output_dir.into(),
            conversation_id: uuid::Uuid::new_v4().to_string(),
            state: ConnectorState::NotStarted,
            utterances: Vec::new(),
            metadata: Map::new(),
            goodbye_sent: false,
            max_utterances: None,
            empty_turns: 0,
        }
    }

    /// Ends the conversation with the agent's goodbye once the transcript
    /// reaches `limit` utterances.
    pub fn with_max_utterances(mut self, limit: Option<usize>) -> Self {
        self.max_utterances = limit;
        self
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn dialogue_history(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn transcript_path(&self) -> PathBuf {
        dialogue::transcript_path(&self.output_dir, self.agent.id(), self.user.id())
    }

    /// Runs the conversation to completion and persists it.
    #[instrument(skip(self), fields(agent_id = %self.agent.id(), user_id = %self.user.id()))]
    pub async fn start(&mut self) -> Result<()> {
        if self.state == ConnectorState::Running {
            return Err(SimlabError::configuration("Dialogue connector is already running"));
        }

        self.state = ConnectorState::Running;
        self.goodbye_sent = false;
        self.empty_turns = 0;
        self.metadata.clear();
        if let Some(need) = self.user.information_need() {
            self.metadata.insert("information_need".to_string(), need.to_dict());
        }

        let welcome = self.agent.welcome().await?;
        let mut outcome = self.register_agent_utterance(welcome);

        while outcome == TurnOutcome::Continue {
            outcome = match self.next_turn().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(utterances = self.utterances.len(), "Dialogue abandoned: {}", e);
                    self.utterances.clear();
                    self.state = ConnectorState::Finished;
                    return Err(e);
                }
            };
        }

        self.close().await
    }

    async fn next_turn(&mut self) -> Result<TurnOutcome> {
        let last = match self.utterances.last() {
            Some(utterance) => utterance.clone(),
            None => return Ok(TurnOutcome::Stop),
        };

        match last.participant {
            DialogueRole::Agent => {
                let reply = self
                    .user
                    .receive_utterance(&self.utterances, &last, self.agent.id())
                    .await?;
                track_empty_turn(&mut self.empty_turns, self.user.id(), &reply)?;
                Ok(self.register_user_utterance(reply))
            }
            DialogueRole::User => {
                let reply = self
                    .agent
                    .receive_utterance(&self.utterances, &last, self.user.id())
                    .await?;
                track_empty_turn(&mut self.empty_turns, self.agent.id(), &reply)?;
                Ok(self.register_agent_utterance(reply))
            }
        }
    }

    pub fn register_agent_utterance(&mut self, mut utterance: Utterance) -> TurnOutcome {
        utterance.participant = DialogueRole::Agent;
        let stop = utterance.has_intent(self.agent.stop_intent());
        debug!(text = %utterance.text, stop, "Agent utterance");
        self.utterances.push(utterance);

        if stop {
            self.goodbye_sent = true;
            return TurnOutcome::Stop;
        }
        self.check_limit()
    }

    pub fn register_user_utterance(&mut self, mut utterance: Utterance) -> TurnOutcome {
        utterance.participant = DialogueRole::User;
        let stop = utterance.has_intent(self.agent.stop_intent());
        debug!(text = %utterance.text, stop, "User utterance");
        self.utterances.push(utterance);

        if stop {
            return TurnOutcome::Stop;
        }
        self.check_limit()
    }

    fn check_limit(&self) -> TurnOutcome {
        match self.max_utterances {
            Some(limit) if self.utterances.len() >= limit => TurnOutcome::Stop,
            _ => TurnOutcome::Continue,
        }
    }

    /// Finishes the conversation: appends the agent's goodbye when a running
    /// conversation has not seen it yet, then dumps the transcript.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectorState::Running && !self.goodbye_sent {
            let goodbye = self.agent.goodbye().await?;
            self.utterances.push(goodbye);
            self.goodbye_sent = true;
        }
        self.state = ConnectorState::Finished;
        self.dump_dialogue_history().await
    }

    /// Appends the transcript to `{output_dir}/{agent_id}_{user_id}.json`.
    ///
    /// An empty transcript touches nothing on disk. The in-memory transcript
    /// is cleared afterwards so a reused connector never writes it twice.
    pub async fn dump_dialogue_history(&mut self) -> Result<()> {
        if self.utterances.is_empty() {
            return Ok(());
        }

        let dialogue = Dialogue {
            conversation_id: self.conversation_id.clone(),
            conversation: std::mem::take(&mut self.utterances),
            metadata: self.metadata.clone(),
            agent: self.agent.to_metadata(),
            user: self.user.to_metadata(),
        };

        let path = self.transcript_path();
        dialogue::append_to_transcript(&path, &dialogue).await?;
        info!(
            path = %path.display(),
            utterances = dialogue.conversation.len(),
            "Dialogue saved"
        );

        self.conversation_id = uuid::Uuid::new_v4().to_string();
        Ok(())
    }
}

/// Counts back-to-back empty replies across both participants and fails the
/// dialogue once the limit is reached.
fn track_empty_turn(empty_turns: &mut usize, participant_id: &str, reply: &Utterance) -> Result<()> {
    if !reply.text.is_empty() || !reply.dialogue_acts.is_empty() {
        *empty_turns = 0;
        return Ok(());
    }

    *empty_turns += 1;
    if *empty_turns >= MAX_CONSECUTIVE_EMPTY_TURNS {
        return Err(SimlabError::RemoteTurn {
            participant_id: participant_id.to_string(),
            reason: format!("{empty_turns} consecutive empty turns"),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dialogue::DialogueAct;
    use crate::information_need::InformationNeed;
    use crate::participant::{Participant, DEFAULT_STOP_INTENT};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Agent that answers every user turn with a numbered reply.
    pub(crate) struct ScriptedAgent {
        pub id: String,
        pub replies: Mutex<usize>,
    }

    impl ScriptedAgent {
        pub(crate) fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                replies: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Participant for ScriptedAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn role(&self) -> DialogueRole {
            DialogueRole::Agent
        }

        async fn receive_utterance(
            &self,
            _context: &[Utterance],
            utterance: &Utterance,
            _counterpart_id: &str,
        ) -> Result<Utterance> {
            let mut replies = self.replies.lock();
            *replies += 1;
            Ok(Utterance::new(
                DialogueRole::Agent,
                format!("reply {} to {}", replies, utterance.text),
            ))
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn stop_intent(&self) -> &str {
            DEFAULT_STOP_INTENT
        }

        async fn welcome(&self) -> Result<Utterance> {
            Ok(Utterance::new(DialogueRole::Agent, "Hello"))
        }

        async fn goodbye(&self) -> Result<Utterance> {
            Ok(Utterance::new(DialogueRole::Agent, "Goodbye")
                .with_dialogue_act(DialogueAct::new(DEFAULT_STOP_INTENT)))
        }
    }

    /// User that leaves after `turns` utterances.
    pub(crate) struct ScriptedUser {
        pub id: String,
        pub turns: usize,
        pub sent: Mutex<usize>,
        pub need: Mutex<Option<InformationNeed>>,
    }

    impl ScriptedUser {
        pub(crate) fn new(id: &str, turns: usize) -> Self {
            Self {
                id: id.to_string(),
                turns,
                sent: Mutex::new(0),
                need: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Participant for ScriptedUser {
        fn id(&self) -> &str {
            &self.id
        }

        fn role(&self) -> DialogueRole {
            DialogueRole::User
        }

        async fn receive_utterance(
            &self,
            _context: &[Utterance],
            _utterance: &Utterance,
            _counterpart_id: &str,
        ) -> Result<Utterance> {
            let mut sent = self.sent.lock();
            *sent += 1;
            if *sent >= self.turns {
                *sent = 0;
                return Ok(Utterance::new(DialogueRole::User, "bye")
                    .with_dialogue_act(DialogueAct::new(DEFAULT_STOP_INTENT)));
            }
            Ok(Utterance::new(DialogueRole::User, format!("question {}", sent)))
        }
    }

    #[async_trait]
    impl UserSimulator for ScriptedUser {
        async fn set_information_need(&self, need: &InformationNeed) -> Result<()> {
            *self.need.lock() = Some(need.clone());
            Ok(())
        }

        fn information_need(&self) -> Option<InformationNeed> {
            self.need.lock().clone()
        }
    }

    fn connector(dir: &Path, turns: usize) -> DialogueConnector {
        DialogueConnector::new(
            Arc::new(ScriptedAgent::new("test_agent")),
            Arc::new(ScriptedUser::new("test_user_simulator", turns)),
            dir,
        )
    }

    #[tokio::test]
    async fn test_empty_dialogue_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("dialogue_export");
        let mut connector = connector(&output_dir, 1);

        connector.dump_dialogue_history().await.unwrap();
        connector.close().await.unwrap();

        assert!(!output_dir.exists());
        assert_eq!(connector.state(), ConnectorState::Finished);
    }

    #[tokio::test]
    async fn test_registered_utterances_are_dumped_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let mut connector = connector(dir.path(), 1);

        connector.register_agent_utterance(Utterance::new(DialogueRole::Agent, "Hello"));
        connector.register_user_utterance(Utterance::new(DialogueRole::User, "Hi"));
        connector.dump_dialogue_history().await.unwrap();

        let path = dir.path().join("test_agent_test_user_simulator.json");
        assert!(path.exists());
        assert!(connector.dialogue_history().is_empty());

        // Nothing left to write a second time.
        connector.dump_dialogue_history().await.unwrap();
        let stored = dialogue::read_transcript(&path).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].conversation.len(), 2);
        assert_eq!(stored[0].agent["id"], "test_agent");
    }

    #[tokio::test]
    async fn test_turns_alternate_until_user_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut connector = connector(dir.path(), 3);

        connector.start().await.unwrap();
        assert_eq!(connector.state(), ConnectorState::Finished);

        let stored = dialogue::read_transcript(&connector.transcript_path()).await.unwrap();
        let roles: Vec<DialogueRole> = stored[0].conversation.iter().map(|u| u.participant).collect();
        // welcome, q1, reply, q2, reply, bye, goodbye
        assert_eq!(roles.len(), 7);
        for (i, role) in roles.iter().take(6).enumerate() {
            let expected = if i % 2 == 0 { DialogueRole::Agent } else { DialogueRole::User };
            assert_eq!(*role, expected);
        }
        assert_eq!(roles[6], DialogueRole::Agent);
        assert!(stored[0].conversation[6].has_intent(DEFAULT_STOP_INTENT));
    }

    #[tokio::test]
    async fn test_information_need_lands_in_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let user = Arc::new(ScriptedUser::new("u1", 1));
        let need = InformationNeed::new(Map::new(), ["title"]);
        user.set_information_need(&need).await.unwrap();

        let mut connector =
            DialogueConnector::new(Arc::new(ScriptedAgent::new("a1")), user, dir.path());
        connector.start().await.unwrap();

        let stored = dialogue::read_transcript(&connector.transcript_path()).await.unwrap();
        assert_eq!(stored[0].information_need(), Some(&need.to_dict()));
    }

    #[tokio::test]
    async fn test_utterance_limit_ends_with_goodbye() {
        let dir = tempfile::tempdir().unwrap();
        let mut connector = connector(dir.path(), 100).with_max_utterances(Some(4));

        connector.start().await.unwrap();

        let stored = dialogue::read_transcript(&connector.transcript_path()).await.unwrap();
        assert_eq!(stored[0].conversation.len(), 5);
        assert!(stored[0].conversation[4].has_intent(DEFAULT_STOP_INTENT));
    }

    /// User whose every turn comes back empty, as a failing remote does.
    struct SilentUser;

    #[async_trait]
    impl Participant for SilentUser {
        fn id(&self) -> &str {
            "silent"
        }

        fn role(&self) -> DialogueRole {
            DialogueRole::User
        }

        async fn receive_utterance(
            &self,
            _context: &[Utterance],
            _utterance: &Utterance,
            _counterpart_id: &str,
        ) -> Result<Utterance> {
            Ok(Utterance::new(DialogueRole::User, ""))
        }
    }

    #[async_trait]
    impl UserSimulator for SilentUser {
        async fn set_information_need(&self, _need: &InformationNeed) -> Result<()> {
            Ok(())
        }

        fn information_need(&self) -> Option<InformationNeed> {
            None
        }
    }

    #[tokio::test]
    async fn test_repeated_empty_turns_abandon_dialogue() {
        let dir = tempfile::tempdir().unwrap();
        let mut connector =
            DialogueConnector::new(Arc::new(ScriptedAgent::new("a1")), Arc::new(SilentUser), dir.path());

        let err = connector.start().await.unwrap_err();
        assert!(matches!(
            &err,
            SimlabError::RemoteTurn { participant_id, .. } if participant_id == "silent"
        ));
        assert_eq!(connector.state(), ConnectorState::Finished);
        assert!(connector.dialogue_history().is_empty());
        assert!(!connector.transcript_path().exists());
    }

    #[test]
    fn test_non_empty_turn_resets_counter() {
        let mut empty_turns = MAX_CONSECUTIVE_EMPTY_TURNS - 1;
        track_empty_turn(&mut empty_turns, "u", &Utterance::new(DialogueRole::User, "hi")).unwrap();
        assert_eq!(empty_turns, 0);

        let acts_only = Utterance::new(DialogueRole::User, "").with_dialogue_act(DialogueAct::new("REQUEST"));
        track_empty_turn(&mut empty_turns, "u", &acts_only).unwrap();
        assert_eq!(empty_turns, 0);
    }
}
