//! 对话编排器：单轮状态机
//!
//! 每轮：持会话锁 → 首次为空时写入系统提示词 → 追加用户消息 → 循环（调用模型 → 若有工具请求则并发执行并写回结果）
//! → 模型给出无工具请求的回复即结束。工具轮数上限、认证失败、模型失败、凭证存储不可用均以一条助手消息结束本轮，
//! 保证历史格式完整（每条带工具请求的助手消息后面都跟着对应的 ToolResult）。
//!
//! 每轮在独立的 tokio 任务中执行：调用方放弃等待（HTTP 客户端断开、外层超时）时，
//! 进行中的工具调用照常跑完并写回结果，之后才释放会话锁。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::events::{preview, TurnEvent};
use crate::core::recovery::{RecoveryEngine, STORAGE_APOLOGY};
use crate::core::session::{ConversationSession, SessionRegistry};
use crate::core::{AgentError, RecoveryAction, TurnReply, TurnState, TurnStatus};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{AssistantMessage, Message};
use crate::tools::{ToolDispatcher, ToolSignature};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

#[derive(Clone)]
pub struct ConversationOrchestrator {
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    sessions: Arc<SessionRegistry>,
    recovery: RecoveryEngine,
    system_prompt: Arc<str>,
    max_tool_rounds: usize,
    model_timeout: Duration,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl ConversationOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        dispatcher: Arc<ToolDispatcher>,
        sessions: Arc<SessionRegistry>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            dispatcher,
            sessions,
            recovery: RecoveryEngine::new(),
            system_prompt: Arc::from(system_prompt.into()),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            model_timeout: Duration::from_secs(120),
            events: None,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// 单次模型调用的整体超时（含客户端内部重试）
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 执行一轮对话；仅凭证存储不可用时返回 Err
    ///
    /// 返回的 future 被丢弃时本轮不会中断，仍在后台跑完。
    pub async fn run_turn(&self, session_id: &str, user_input: &str) -> Result<TurnReply, AgentError> {
        let turn = self.clone();
        let session_id = session_id.to_string();
        let user_input = user_input.to_string();
        tokio::spawn(async move { turn.drive_turn(&session_id, &user_input).await })
            .await
            .map_err(|e| AgentError::Internal(format!("turn task failed: {}", e)))?
    }

    async fn drive_turn(&self, session_id: &str, user_input: &str) -> Result<TurnReply, AgentError> {
        let mut session: OwnedMutexGuard<ConversationSession> =
            self.sessions.get_or_create(session_id).await.lock_owned().await;

        let mut state = TurnState::Init;
        let mut rounds = 0usize;
        let signatures = self.dispatcher.signatures();

        loop {
            debug!(session_id, state = state.label(), rounds, "turn state");
            state = match state {
                TurnState::Init => {
                    if session.is_empty() {
                        session.push(Message::system(self.system_prompt.as_ref()));
                    }
                    session.push(Message::user(user_input));
                    session.turns += 1;
                    info!(session_id, turn = session.turns, "Turn started");
                    TurnState::AwaitingModel
                }
                TurnState::AwaitingModel => {
                    self.emit(TurnEvent::Thinking {
                        session_id: session_id.to_string(),
                        round: rounds,
                    });
                    match self.call_model(&session, &signatures).await {
                        Err(e) => {
                            warn!(session_id, "Model call failed: {}", e);
                            let action = self.recovery.after_model_error(&e);
                            self.conclude(&mut session, action, rounds)?
                        }
                        Ok(reply) if !reply.has_tool_calls() => {
                            let text = reply.content.clone();
                            session.push(Message::Assistant(reply));
                            TurnState::Done(TurnReply {
                                text,
                                status: TurnStatus::Completed,
                                rounds,
                            })
                        }
                        Ok(_) if rounds >= self.max_tool_rounds => {
                            warn!(session_id, rounds, "Tool round limit reached");
                            let action = self.recovery.round_limit(self.max_tool_rounds);
                            self.conclude(&mut session, action, rounds)?
                        }
                        Ok(reply) => {
                            let calls = reply.tool_calls.clone();
                            session.push(Message::Assistant(reply));
                            TurnState::AwaitingTools(calls)
                        }
                    }
                }
                TurnState::AwaitingTools(calls) => {
                    rounds += 1;
                    for call in &calls {
                        self.emit(TurnEvent::ToolCall {
                            session_id: session_id.to_string(),
                            tool: call.tool_name.clone(),
                            args: call.arguments.clone(),
                        });
                    }

                    let results = self.dispatcher.invoke(&calls).await;
                    for result in &results {
                        self.emit(TurnEvent::Observation {
                            session_id: session_id.to_string(),
                            call_id: result.call_id.clone(),
                            is_error: result.is_error,
                            preview: preview(&result.content, 200),
                        });
                    }
                    let action = self.recovery.after_tools(&results);
                    for result in results {
                        session.push(Message::tool_result(result));
                    }

                    match action {
                        RecoveryAction::Continue => TurnState::AwaitingModel,
                        other => self.conclude(&mut session, other, rounds)?,
                    }
                }
                TurnState::Done(reply) => {
                    self.emit(TurnEvent::TurnEnded {
                        session_id: session_id.to_string(),
                        status: reply.status,
                        rounds: reply.rounds,
                    });
                    info!(session_id, status = ?reply.status, rounds = reply.rounds, "Turn finished");
                    return Ok(reply);
                }
            };
        }
    }

    async fn call_model(
        &self,
        session: &ConversationSession,
        signatures: &[ToolSignature],
    ) -> Result<AssistantMessage, LlmError> {
        match timeout(
            self.model_timeout,
            self.llm.complete(session.messages(), signatures),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout),
        }
    }

    /// 以恢复动作结束本轮：EndTurn 写入助手消息后进入 Done；Abort 写入致歉消息后向上传播
    fn conclude(
        &self,
        session: &mut ConversationSession,
        action: RecoveryAction,
        rounds: usize,
    ) -> Result<TurnState, AgentError> {
        match action {
            RecoveryAction::EndTurn { status, reply } => {
                session.push(Message::assistant(reply.clone()));
                Ok(TurnState::Done(TurnReply {
                    text: reply,
                    status,
                    rounds,
                }))
            }
            RecoveryAction::Abort(err) => {
                session.push(Message::assistant(STORAGE_APOLOGY));
                warn!(session_id = %session.id, "Turn aborted: {}", err);
                Err(err)
            }
            RecoveryAction::Continue => Err(AgentError::Internal(
                "continue is not a terminal action".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        AppCredentials, AuthError, AuthResult, AuthorizationServerClient, MemoryCredentialStore,
        TokenGrant, TokenLifecycleManager,
    };
    use crate::llm::ScriptedLlmClient;
    use crate::memory::ToolInvocationRequest;
    use crate::tools::{PublicTool, ToolError, ToolRegistry};
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    struct NoServer;

    #[async_trait]
    impl AuthorizationServerClient for NoServer {
        async fn exchange_code(&self, _: &str, _: &str, _: &AppCredentials) -> AuthResult<TokenGrant> {
            Err(AuthError::Upstream("unused".into()))
        }

        async fn refresh(&self, _: &str, _: &AppCredentials) -> AuthResult<TokenGrant> {
            Err(AuthError::Upstream("unused".into()))
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct Empty {}

    struct CountPlants;

    #[async_trait]
    impl PublicTool for CountPlants {
        type Args = Empty;

        fn name(&self) -> &str {
            "list_plants"
        }

        fn description(&self) -> &str {
            "count plants"
        }

        async fn execute(&self, _: Empty) -> Result<String, ToolError> {
            Ok("3 plants found".to_string())
        }
    }

    /// 耗时较长的工具，用于模拟调用方中途放弃
    struct SlowSurvey;

    #[async_trait]
    impl PublicTool for SlowSurvey {
        type Args = Empty;

        fn name(&self) -> &str {
            "slow_survey"
        }

        fn description(&self) -> &str {
            "survey all plants slowly"
        }

        async fn execute(&self, _: Empty) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok("survey done".to_string())
        }
    }

    fn orchestrator(llm: Arc<ScriptedLlmClient>, max_rounds: usize) -> ConversationOrchestrator {
        let mut registry = ToolRegistry::new();
        registry.register_public(CountPlants);
        registry.register_public(SlowSurvey);
        let tokens = Arc::new(TokenLifecycleManager::new(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(NoServer),
            AppCredentials::default(),
        ));
        let dispatcher = Arc::new(ToolDispatcher::new(registry, tokens, 5, 3));
        ConversationOrchestrator::new(
            llm,
            dispatcher,
            Arc::new(SessionRegistry::default()),
            "You are a solar assistant.",
        )
        .with_max_tool_rounds(max_rounds)
    }

    fn call(id: &str, tool: &str) -> AssistantMessage {
        AssistantMessage::with_tool_calls("", vec![ToolInvocationRequest::new(id, tool, json!({}))])
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(AssistantMessage::text("Hello!"))]));
        let orch = orchestrator(llm, 8);
        let reply = orch.run_turn("s1", "hi").await.unwrap();
        assert_eq!(reply.text, "Hello!");
        assert_eq!(reply.status, TurnStatus::Completed);
        assert_eq!(reply.rounds, 0);

        let history = orch.sessions().history("s1").await.unwrap();
        assert!(history[0].is_system());
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_round_cap_ends_looping_model() {
        let llm = Arc::new(ScriptedLlmClient::looping(call("c1", "list_plants")));
        let orch = orchestrator(llm.clone(), 2);
        let reply = orch.run_turn("s1", "loop forever").await.unwrap();

        assert_eq!(reply.status, TurnStatus::RoundLimitReached);
        assert_eq!(reply.rounds, 2);
        assert_eq!(llm.call_count().await, 3);

        let history = orch.sessions().history("s1").await.unwrap();
        match history.last().unwrap() {
            Message::Assistant(a) => {
                assert!(!a.has_tool_calls());
                assert_eq!(a.content, reply.text);
            }
            other => panic!("unexpected last message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_model_failure_becomes_reply() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::Api {
            status: 503,
            message: "overloaded".into(),
        })]));
        let orch = orchestrator(llm, 8);
        let reply = orch.run_turn("s1", "hi").await.unwrap();
        assert_eq!(reply.status, TurnStatus::ModelUnavailable);
        assert!(reply.text.contains("overloaded"));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "list_plants")),
            Ok(AssistantMessage::text("You have 3 plants.")),
        ]));
        let orch = orchestrator(llm, 8).with_event_sender(tx);
        orch.run_turn("s1", "List my plants").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                TurnEvent::Thinking { .. } => "thinking",
                TurnEvent::ToolCall { .. } => "tool_call",
                TurnEvent::Observation { .. } => "observation",
                TurnEvent::TurnEnded { .. } => "ended",
            });
        }
        assert_eq!(
            kinds,
            vec!["thinking", "tool_call", "observation", "thinking", "ended"]
        );
    }

    #[tokio::test]
    async fn test_abandoned_turn_still_records_tool_results() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "slow_survey")),
            Ok(AssistantMessage::text("Survey finished.")),
            Ok(AssistantMessage::text("Next answer.")),
        ]));
        let orch = orchestrator(llm.clone(), 8);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            orch.run_turn("s1", "survey my plants"),
        )
        .await;
        assert!(abandoned.is_err());

        let reply = orch.run_turn("s1", "next").await.unwrap();
        assert_eq!(reply.text, "Next answer.");

        let histories = llm.seen_histories().await;
        assert_eq!(histories.len(), 3);
        let last = histories.last().unwrap();
        for message in last {
            if let Message::Assistant(a) = message {
                for c in &a.tool_calls {
                    assert!(
                        last.iter().any(|m| matches!(
                            m,
                            Message::ToolResult(r) if r.call_id == c.call_id
                        )),
                        "tool call {} has no result",
                        c.call_id
                    );
                }
            }
        }
        assert!(matches!(
            &last[3],
            Message::ToolResult(r) if r.content == "survey done"
        ));
    }
}
