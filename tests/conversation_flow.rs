//! 对话全流程集成测试：编排器 + 分发器 + Token 生命周期管理，全部使用假实现

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use solar_assistant::auth::{
    now_unix, AppCredentials, AuthError, AuthResult, AuthorizationServerClient, Credential,
    CredentialStore, MemoryCredentialStore, TokenGrant, TokenLifecycleManager,
};
use solar_assistant::core::{ConversationOrchestrator, SessionRegistry, TurnStatus};
use solar_assistant::llm::ScriptedLlmClient;
use solar_assistant::memory::{AssistantMessage, Message, ToolInvocationRequest};
use solar_assistant::tools::{AuthenticatedTool, PublicTool, ToolDispatcher, ToolError, ToolRegistry};

const PROVIDER: &str = "isolarcloud";

/// 授权服务器假实现：记录刷新次数，可配置为拒绝刷新
struct FakeAuthServer {
    refreshes: AtomicUsize,
    reject: bool,
}

impl FakeAuthServer {
    fn new(reject: bool) -> Arc<Self> {
        Arc::new(Self {
            refreshes: AtomicUsize::new(0),
            reject,
        })
    }
}

#[async_trait]
impl AuthorizationServerClient for FakeAuthServer {
    async fn exchange_code(&self, _: &str, _: &str, _: &AppCredentials) -> AuthResult<TokenGrant> {
        Err(AuthError::Upstream("unused".into()))
    }

    async fn refresh(&self, refresh_token: &str, _: &AppCredentials) -> AuthResult<TokenGrant> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(AuthError::Upstream(
                "result_code=E912: refresh token invalid".into(),
            ));
        }
        assert_eq!(refresh_token, "rt-old");
        Ok(TokenGrant {
            access_token: "at-new".into(),
            refresh_token: Some("rt-new".into()),
            expires_in: Some(3600),
        })
    }
}

#[derive(Deserialize, JsonSchema)]
struct NoArgs {}

struct ListPlants;

#[async_trait]
impl PublicTool for ListPlants {
    type Args = NoArgs;

    fn name(&self) -> &str {
        "list_plants"
    }

    fn description(&self) -> &str {
        "List the user's plants"
    }

    async fn execute(&self, _: NoArgs) -> Result<String, ToolError> {
        Ok("3 plants found".to_string())
    }
}

/// 认证工具：记录每次收到的 access token
struct PlantCount {
    seen_tokens: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AuthenticatedTool for PlantCount {
    type Args = NoArgs;

    fn name(&self) -> &str {
        "list_solar_plants"
    }

    fn description(&self) -> &str {
        "List plants from iSolarCloud"
    }

    async fn execute(&self, _: NoArgs, access_token: &str) -> Result<String, ToolError> {
        if let Ok(mut seen) = self.seen_tokens.lock() {
            seen.push(access_token.to_string());
        }
        Ok("2 plants found".to_string())
    }
}

struct Harness {
    orchestrator: ConversationOrchestrator,
    llm: Arc<ScriptedLlmClient>,
    store: Arc<MemoryCredentialStore>,
    server: Arc<FakeAuthServer>,
    seen_tokens: Arc<Mutex<Vec<String>>>,
}

fn harness(llm: ScriptedLlmClient, credential: Option<Credential>, reject_refresh: bool) -> Harness {
    let store = Arc::new(match credential {
        Some(c) => MemoryCredentialStore::with_credential(c),
        None => MemoryCredentialStore::new(),
    });
    let server = FakeAuthServer::new(reject_refresh);
    let tokens = Arc::new(TokenLifecycleManager::new(
        store.clone(),
        server.clone(),
        AppCredentials::new("key", "secret"),
    ));

    let seen_tokens = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register_public(ListPlants);
    registry.register_authenticated(
        PROVIDER,
        PlantCount {
            seen_tokens: seen_tokens.clone(),
        },
    );

    let llm = Arc::new(llm);
    let dispatcher = Arc::new(ToolDispatcher::new(registry, tokens, 5, 3));
    let orchestrator = ConversationOrchestrator::new(
        llm.clone(),
        dispatcher,
        Arc::new(SessionRegistry::default()),
        "You are a solar assistant.",
    );
    Harness {
        orchestrator,
        llm,
        store,
        server,
        seen_tokens,
    }
}

fn request(call_id: &str, tool: &str) -> AssistantMessage {
    AssistantMessage::with_tool_calls("", vec![ToolInvocationRequest::new(call_id, tool, json!({}))])
}

fn expired_credential() -> Credential {
    Credential::new(
        PROVIDER,
        "at-old",
        Some("rt-old".into()),
        Some(now_unix() - 10),
    )
}

#[tokio::test]
async fn list_plants_result_reaches_the_model() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(request("c1", "list_plants")),
            Ok(AssistantMessage::text("You have 3 plants.")),
        ]),
        None,
        false,
    );

    let reply = h.orchestrator.run_turn("s1", "List my plants").await.unwrap();
    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(reply.rounds, 1);
    assert!(reply.text.contains('3'));

    let histories = h.llm.seen_histories().await;
    assert_eq!(histories.len(), 2);
    match histories[1].last().unwrap() {
        Message::ToolResult(result) => {
            assert_eq!(result.call_id, "c1");
            assert_eq!(result.content, "3 plants found");
            assert!(!result.is_error);
        }
        other => panic!("expected tool result, got {:?}", other),
    }
}

#[tokio::test]
async fn expired_credential_is_refreshed_once_and_old_token_never_used() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(AssistantMessage::with_tool_calls(
                "",
                vec![
                    ToolInvocationRequest::new("c1", "list_solar_plants", json!({})),
                    ToolInvocationRequest::new("c2", "list_solar_plants", json!({})),
                ],
            )),
            Ok(AssistantMessage::text("You have 2 plants.")),
        ]),
        Some(expired_credential()),
        false,
    );

    let reply = h.orchestrator.run_turn("s1", "How many plants?").await.unwrap();
    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(h.server.refreshes.load(Ordering::SeqCst), 1);

    let seen = h.seen_tokens.lock().unwrap().clone();
    assert_eq!(seen, vec!["at-new".to_string(), "at-new".to_string()]);

    let stored = h.store.get(PROVIDER).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "at-new");
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-new"));
}

#[tokio::test]
async fn unknown_tool_is_reported_and_turn_completes() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(request("c9", "foo_bar")),
            Ok(AssistantMessage::text("Sorry, I can't do that.")),
        ]),
        None,
        false,
    );

    let reply = h.orchestrator.run_turn("s1", "do foo").await.unwrap();
    assert_eq!(reply.status, TurnStatus::Completed);

    let history = h.orchestrator.sessions().history("s1").await.unwrap();
    let result = history
        .iter()
        .find_map(|m| match m {
            Message::ToolResult(r) => Some(r.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(result.call_id, "c9");
    assert!(result.is_error);
    assert!(result.content.contains("unknown tool"));
}

#[tokio::test]
async fn rejected_refresh_ends_turn_and_keeps_prior_credential() {
    let prior = expired_credential();
    let h = harness(
        ScriptedLlmClient::new(vec![Ok(request("c1", "list_solar_plants"))]),
        Some(prior.clone()),
        true,
    );

    let reply = h.orchestrator.run_turn("s1", "List my plants").await.unwrap();
    assert_eq!(reply.status, TurnStatus::AuthenticationFailed);
    assert!(reply
        .text
        .starts_with("I couldn't authenticate with isolarcloud:"));
    assert_eq!(h.server.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(h.llm.call_count().await, 1);
    assert!(h.seen_tokens.lock().unwrap().is_empty());
    assert_eq!(h.store.get(PROVIDER).await.unwrap(), Some(prior));

    let history = h.orchestrator.sessions().history("s1").await.unwrap();
    let n = history.len();
    assert!(matches!(&history[n - 2], Message::ToolResult(r) if r.is_error));
    assert_eq!(history[n - 1].content(), reply.text);
}

#[tokio::test]
async fn missing_credential_asks_user_to_authorize() {
    let h = harness(
        ScriptedLlmClient::new(vec![Ok(request("c1", "list_solar_plants"))]),
        None,
        false,
    );

    let reply = h.orchestrator.run_turn("s1", "List my plants").await.unwrap();
    assert_eq!(reply.status, TurnStatus::AuthenticationFailed);
    assert!(reply.text.contains("isolarcloud"));
    assert_eq!(h.server.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn system_prompt_inserted_once_across_turns() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(AssistantMessage::text("first")),
            Ok(AssistantMessage::text("second")),
            Ok(AssistantMessage::text("third")),
        ]),
        None,
        false,
    );

    for text in ["a", "b", "a"] {
        h.orchestrator.run_turn("s1", text).await.unwrap();
    }

    let history = h.orchestrator.sessions().history("s1").await.unwrap();
    assert_eq!(history.iter().filter(|m| m.is_system()).count(), 1);
    assert!(history[0].is_system());
    // 相同输入重发也是新的一轮
    assert_eq!(history.len(), 1 + 3 * 2);
}

#[tokio::test]
async fn concurrent_turns_on_one_session_do_not_interleave() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(AssistantMessage::text("reply one")),
            Ok(AssistantMessage::text("reply two")),
        ])
        .with_delay(std::time::Duration::from_millis(50)),
        None,
        false,
    );

    let (a, b) = tokio::join!(
        h.orchestrator.run_turn("shared", "first question"),
        h.orchestrator.run_turn("shared", "second question"),
    );
    a.unwrap();
    b.unwrap();

    let history = h.orchestrator.sessions().history("shared").await.unwrap();
    assert_eq!(history.len(), 5);
    assert!(history[0].is_system());
    assert!(matches!(history[1], Message::User { .. }));
    assert!(matches!(history[2], Message::Assistant(_)));
    assert!(matches!(history[3], Message::User { .. }));
    assert!(matches!(history[4], Message::Assistant(_)));

    // 第二轮的模型调用看到的是第一轮完整结束后的历史
    let histories = h.llm.seen_histories().await;
    assert_eq!(histories[0].len(), 2);
    assert_eq!(histories[1].len(), 4);
}

#[tokio::test]
async fn different_sessions_are_isolated() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(AssistantMessage::text("for alice")),
            Ok(AssistantMessage::text("for bob")),
        ]),
        None,
        false,
    );

    h.orchestrator.run_turn("alice", "hi").await.unwrap();
    h.orchestrator.run_turn("bob", "hello").await.unwrap();

    let alice = h.orchestrator.sessions().history("alice").await.unwrap();
    let bob = h.orchestrator.sessions().history("bob").await.unwrap();
    assert_eq!(alice.len(), 3);
    assert_eq!(bob.len(), 3);
    assert_eq!(bob[1].content(), "hello");
}

#[tokio::test]
async fn turns_on_different_sessions_run_in_parallel() {
    let delay = std::time::Duration::from_millis(200);
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(AssistantMessage::text("reply one")),
            Ok(AssistantMessage::text("reply two")),
        ])
        .with_delay(delay),
        None,
        false,
    );

    let started = std::time::Instant::now();
    let (a, b) = tokio::join!(
        h.orchestrator.run_turn("alice", "hi"),
        h.orchestrator.run_turn("bob", "hello"),
    );
    let elapsed = started.elapsed();
    a.unwrap();
    b.unwrap();

    // 串行执行至少需要两倍延迟
    assert!(elapsed < delay * 2, "turns were serialized: {:?}", elapsed);
    assert_eq!(h.llm.call_count().await, 2);
    assert_eq!(h.orchestrator.sessions().history("alice").await.unwrap().len(), 3);
    assert_eq!(h.orchestrator.sessions().history("bob").await.unwrap().len(), 3);
}
