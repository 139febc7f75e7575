//! 工具分发器
//!
//! 持有 ToolRegistry、TokenLifecycleManager 与单次调用超时。invoke(requests) 并发执行一批调用
//! （Semaphore 限流），每个请求恰好产出一个 ToolResult（call_id 对应）；成功与各类失败统一为结果数据，
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::auth::TokenLifecycleManager;
use crate::core::TaskScheduler;
use crate::memory::{ToolFailureKind, ToolInvocationRequest, ToolResult};
use crate::tools::{ToolError, ToolRegistry, ToolSignature};

pub struct ToolDispatcher {
    registry: ToolRegistry,
    tokens: Arc<TokenLifecycleManager>,
    timeout: Duration,
    scheduler: TaskScheduler,
}

impl ToolDispatcher {
    pub fn new(
        registry: ToolRegistry,
        tokens: Arc<TokenLifecycleManager>,
        timeout_secs: u64,
        max_concurrent: usize,
    ) -> Self {
        Self::with_timeout(
            registry,
            tokens,
            Duration::from_secs(timeout_secs),
            max_concurrent,
        )
    }

    pub fn with_timeout(
        registry: ToolRegistry,
        tokens: Arc<TokenLifecycleManager>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            tokens,
            timeout,
            scheduler: TaskScheduler::new(max_concurrent),
        }
    }

    pub fn signatures(&self) -> Vec<ToolSignature> {
        self.registry.signatures()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 并发执行一批调用，结果顺序与请求一致
    pub async fn invoke(&self, requests: &[ToolInvocationRequest]) -> Vec<ToolResult> {
        join_all(requests.iter().map(|request| self.invoke_one(request))).await
    }

    async fn invoke_one(&self, request: &ToolInvocationRequest) -> ToolResult {
        let _permit = self.scheduler.acquire_tool().await.ok();
        let start = Instant::now();
        let args_preview = args_preview(&request.arguments);

        let result = match self.registry.get(&request.tool_name) {
            None => ToolResult::failure(
                &request.call_id,
                ToolFailureKind::UnknownTool,
                format!(
                    "unknown tool: {}. Available tools: {}",
                    request.tool_name,
                    self.registry.tool_names().join(", ")
                ),
            ),
            Some(capability) => {
                match timeout(
                    self.timeout,
                    capability.invoke(request.arguments.clone(), &self.tokens),
                )
                .await
                {
                    Ok(Ok(content)) => ToolResult::success(&request.call_id, content),
                    Ok(Err(e)) => failure_result(&request.call_id, &request.tool_name, e),
                    Err(_) => ToolResult::failure(
                        &request.call_id,
                        ToolFailureKind::Timeout,
                        format!(
                            "{} timed out after {}s",
                            request.tool_name,
                            self.timeout.as_secs_f32()
                        ),
                    ),
                }
            }
        };

        let outcome = match &result.failure {
            None => "ok",
            Some(ToolFailureKind::UnknownTool) => "unknown_tool",
            Some(ToolFailureKind::InvalidArguments) => "invalid_arguments",
            Some(ToolFailureKind::Execution) => "error",
            Some(ToolFailureKind::Timeout) => "timeout",
            Some(ToolFailureKind::Authentication { .. }) => "authentication",
            Some(ToolFailureKind::Refresh { .. }) => "refresh",
            Some(ToolFailureKind::Storage(_)) => "storage",
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": request.tool_name,
            "call_id": request.call_id,
            "ok": !result.is_error,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

fn failure_result(call_id: &str, tool_name: &str, error: ToolError) -> ToolResult {
    let content = error.to_string();
    match error {
        ToolError::InvalidArguments { .. } => {
            ToolResult::failure(call_id, ToolFailureKind::InvalidArguments, content)
        }
        ToolError::Timeout(_) => ToolResult::failure(
            call_id,
            ToolFailureKind::Timeout,
            format!("{} failed: {}", tool_name, content),
        ),
        ToolError::Authentication { provider, reason } => ToolResult::failure(
            call_id,
            ToolFailureKind::Authentication { provider, reason },
            content,
        ),
        ToolError::Refresh { provider, reason } => ToolResult::failure(
            call_id,
            ToolFailureKind::Refresh { provider, reason },
            content,
        ),
        ToolError::Storage(msg) => {
            ToolResult::failure(call_id, ToolFailureKind::Storage(msg), content)
        }
        ToolError::Http(_) | ToolError::Upstream { .. } | ToolError::Malformed(_) => {
            ToolResult::failure(
                call_id,
                ToolFailureKind::Execution,
                format!("{} failed: {}", tool_name, content),
            )
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        AppCredentials, AuthResult, AuthorizationServerClient, Credential, MemoryCredentialStore,
        TokenGrant,
    };
    use crate::tools::{AuthenticatedTool, PublicTool};
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoServer;

    #[async_trait]
    impl AuthorizationServerClient for NoServer {
        async fn exchange_code(
            &self,
            _code: &str,
            _redirect_uri: &str,
            _app: &AppCredentials,
        ) -> AuthResult<TokenGrant> {
            Err(crate::auth::AuthError::Upstream("unused".into()))
        }

        async fn refresh(&self, _rt: &str, _app: &AppCredentials) -> AuthResult<TokenGrant> {
            Err(crate::auth::AuthError::Upstream("result_code 0".into()))
        }
    }

    fn tokens(store: MemoryCredentialStore) -> Arc<TokenLifecycleManager> {
        Arc::new(TokenLifecycleManager::new(
            Arc::new(store),
            Arc::new(NoServer),
            AppCredentials::default(),
        ))
    }

    #[derive(Deserialize, JsonSchema)]
    struct SleepArgs {
        millis: u64,
    }

    /// 记录并发峰值的工具
    struct Sleeper {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PublicTool for Sleeper {
        type Args = SleepArgs;

        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "Sleep for a while"
        }

        async fn execute(&self, args: SleepArgs) -> Result<String, ToolError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(args.millis)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("slept {}ms", args.millis))
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct NoArgs {}

    struct WhoAmI;

    #[async_trait]
    impl AuthenticatedTool for WhoAmI {
        type Args = NoArgs;

        fn name(&self) -> &str {
            "whoami"
        }

        fn description(&self) -> &str {
            "Echo the bearer token"
        }

        async fn execute(&self, _args: NoArgs, access_token: &str) -> Result<String, ToolError> {
            Ok(format!("token={}", access_token))
        }
    }

    fn registry() -> (ToolRegistry, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register_public(Sleeper {
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        });
        registry.register_authenticated("isolarcloud", WhoAmI);
        (registry, peak)
    }

    #[tokio::test]
    async fn test_call_id_round_trip() {
        let (registry, _) = registry();
        let dispatcher = ToolDispatcher::new(registry, tokens(MemoryCredentialStore::new()), 5, 3);
        let results = dispatcher
            .invoke(&[ToolInvocationRequest::new("c1", "sleep", json!({"millis": 1}))])
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].call_id, "c1");
        assert!(!results[0].is_error);
        assert_eq!(results[0].content, "slept 1ms");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (registry, _) = registry();
        let dispatcher = ToolDispatcher::new(registry, tokens(MemoryCredentialStore::new()), 5, 3);
        let results = dispatcher
            .invoke(&[ToolInvocationRequest::new("c1", "foo_bar", json!({}))])
            .await;
        assert!(results[0].is_error);
        assert_eq!(results[0].failure, Some(ToolFailureKind::UnknownTool));
        assert!(results[0].content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_execute() {
        let (registry, peak) = registry();
        let dispatcher = ToolDispatcher::new(registry, tokens(MemoryCredentialStore::new()), 5, 3);
        let results = dispatcher
            .invoke(&[ToolInvocationRequest::new("c1", "sleep", json!({"millis": "soon"}))])
            .await;
        assert_eq!(results[0].failure, Some(ToolFailureKind::InvalidArguments));
        assert!(results[0].content.starts_with("invalid arguments for sleep:"));
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout() {
        let (registry, _) = registry();
        let dispatcher = ToolDispatcher::with_timeout(
            registry,
            tokens(MemoryCredentialStore::new()),
            Duration::from_millis(20),
            3,
        );
        let results = dispatcher
            .invoke(&[ToolInvocationRequest::new("c1", "sleep", json!({"millis": 500}))])
            .await;
        assert_eq!(results[0].failure, Some(ToolFailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_batch_is_concurrent_but_bounded() {
        let (registry, peak) = registry();
        let dispatcher = ToolDispatcher::new(registry, tokens(MemoryCredentialStore::new()), 5, 2);
        let requests: Vec<_> = (0..5)
            .map(|i| ToolInvocationRequest::new(format!("c{}", i), "sleep", json!({"millis": 40})))
            .collect();
        let results = dispatcher.invoke(&requests).await;

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4"]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_authenticated_tool_receives_current_token() {
        let (registry, _) = registry();
        let store = MemoryCredentialStore::with_credential(Credential::new(
            "isolarcloud",
            "tok-123",
            None,
            None,
        ));
        let dispatcher = ToolDispatcher::new(registry, tokens(store), 5, 3);
        let results = dispatcher
            .invoke(&[ToolInvocationRequest::new("c1", "whoami", json!({}))])
            .await;
        assert_eq!(results[0].content, "token=tok-123");
    }

    #[tokio::test]
    async fn test_missing_credential_is_authentication_failure() {
        let (registry, _) = registry();
        let dispatcher = ToolDispatcher::new(registry, tokens(MemoryCredentialStore::new()), 5, 3);
        let results = dispatcher
            .invoke(&[ToolInvocationRequest::new("c1", "whoami", json!(null))])
            .await;
        assert!(results[0].is_auth_failure());
        assert!(results[0]
            .content
            .starts_with("I couldn't authenticate with isolarcloud"));
    }
}
