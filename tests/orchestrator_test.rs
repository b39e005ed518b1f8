//! 编排器集成测试：完整的 handle_message 流程、工具隔离、检索降级、排队、取消与恢复

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use hive::config::AppConfig;
    use hive::core::{AgentBuilder, AgentError, AgentPhase, ManualClock, Orchestrator};
    use hive::llm::{LlmClient, MockLlmClient, ScriptedLlmClient};
    use hive::memory::MemoryRole;
    use hive::persona::Persona;
    use hive::react::PlanEvent;
    use hive::retrieval::{KeywordIndex, Passage, RetrievalError, SearchBackend};
    use hive::store::{BlobError, BlobStore, InMemoryBlobStore};
    use hive::tools::{Tool, ToolSpec};

    const RESPOND_ONLY: &str = r#"{"steps": [{"kind": "respond"}]}"#;

    fn persona() -> Persona {
        Persona::builder("Assistant")
            .with_description("A concise assistant.")
            .with_rule("Answer briefly")
            .build()
            .unwrap()
    }

    fn fixed_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()))
    }

    fn builder(llm: Arc<dyn LlmClient>, store: Arc<dyn BlobStore>) -> AgentBuilder {
        AgentBuilder::new(AppConfig::default())
            .with_llm(llm)
            .with_blob_store(store)
            .with_clock(fixed_clock())
            .with_search_backend(Arc::new(KeywordIndex::default()))
    }

    async fn orchestrator(llm: ScriptedLlmClient) -> Orchestrator {
        builder(Arc::new(llm), Arc::new(InMemoryBlobStore::new()))
            .build()
            .await
            .unwrap()
    }

    /// 前 slow_calls 次调用先睡眠 delay
    struct SlowTool {
        delay: Duration,
        slow_calls: usize,
        calls: AtomicUsize,
    }

    impl SlowTool {
        fn new(delay: Duration, slow_calls: usize) -> Self {
            Self {
                delay,
                slow_calls,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Waits before answering"
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.slow_calls {
                tokio::time::sleep(self.delay).await;
            }
            Ok(json!({"done": true}))
        }
    }

    struct DownBackend;

    #[async_trait]
    impl SearchBackend for DownBackend {
        async fn embed_search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>, RetrievalError> {
            Err(RetrievalError::Unavailable("connection refused".to_string()))
        }
    }

    /// 读正常、写总是失败的存储
    struct ReadOnlyStore;

    #[async_trait]
    impl BlobStore for ReadOnlyStore {
        async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
            Err(BlobError::NotFound(key.to_string()))
        }

        async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<(), BlobError> {
            Err(BlobError::Io("disk full".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), BlobError> {
            Ok(())
        }

        async fn list(&self, _prefix: &str) -> Result<Vec<String>, BlobError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_what_is_two_plus_two() {
        let llm = ScriptedLlmClient::new().with_reply(RESPOND_ONLY).with_reply("2 + 2 = 4.");
        let orch = orchestrator(llm).await;
        let id = orch.start_conversation(persona()).await.unwrap();

        let reply = orch.handle_message(&id, "What's 2+2?").await.unwrap();
        assert!(reply.contains('4'));

        let state = orch.snapshot(&id).await.unwrap();
        let roles: Vec<MemoryRole> = state.memory.entries.iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![MemoryRole::User, MemoryRole::Agent]);
        assert_eq!(state.memory.entries[0].content, "What's 2+2?");
        assert_eq!(state.exchanges, 1);
        assert_eq!(orch.phase(&id).await.unwrap(), AgentPhase::Idle);
    }

    #[tokio::test]
    async fn test_calculator_malformed_args_records_tool_error() {
        let llm = ScriptedLlmClient::new()
            .with_reply(
                r#"{"steps": [{"kind": "invoke_tool", "tool": "calculator", "args": {"expr": "2+2"}},
                              {"kind": "respond", "depends_on": [0]}]}"#,
            )
            .with_reply("I could not run the calculation.")
            .with_reply(RESPOND_ONLY)
            .with_reply("Hello again!");
        let orch = orchestrator(llm).await;
        let id = orch.start_conversation(persona()).await.unwrap();

        let reply = orch.handle_message(&id, "What's 2+2?").await.unwrap();
        assert!(reply.starts_with("I could not run the calculation."));
        assert!(reply.contains("[Note:"));

        let state = orch.snapshot(&id).await.unwrap();
        let entries = &state.memory.entries;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].role, MemoryRole::Tool);
        let meta = entries[1].metadata.as_ref().unwrap();
        assert_eq!(meta["tool"], "calculator");
        assert_eq!(meta["kind"], "schema_mismatch");
        assert!(entries[1].content.contains("expression"));

        // 后续轮次不受影响
        assert_eq!(orch.handle_message(&id, "hi").await.unwrap(), "Hello again!");
    }

    #[tokio::test]
    async fn test_tool_timeout_is_isolated() {
        let llm = ScriptedLlmClient::new()
            .with_reply(r#"{"steps": [{"kind": "invoke_tool", "tool": "slow"}, {"kind": "respond"}]}"#)
            .with_reply("The slow tool did not answer in time.")
            .with_reply(RESPOND_ONLY)
            .with_reply("Still here.");
        let orch = builder(Arc::new(llm), Arc::new(InMemoryBlobStore::new()))
            .with_tool(ToolSpec::custom(Arc::new(SlowTool::new(Duration::from_secs(5), usize::MAX))))
            .with_tool_timeout(Duration::from_millis(50))
            .build()
            .await
            .unwrap();
        let id = orch.start_conversation(persona()).await.unwrap();

        let reply = orch.handle_message(&id, "use the slow tool").await.unwrap();
        assert!(reply.contains("tool_execution_error"));

        let state = orch.snapshot(&id).await.unwrap();
        let tool_entries: Vec<_> = state
            .memory
            .entries
            .iter()
            .filter(|e| e.role == MemoryRole::Tool)
            .collect();
        assert_eq!(tool_entries.len(), 1);
        assert_eq!(tool_entries[0].metadata.as_ref().unwrap()["kind"], "tool_execution_error");

        assert_eq!(orch.handle_message(&id, "ping").await.unwrap(), "Still here.");
    }

    #[tokio::test]
    async fn test_retrieval_unavailable_still_answers() {
        let llm = ScriptedLlmClient::new()
            .with_reply(r#"{"steps": [{"kind": "retrieve", "query": "release notes"}, {"kind": "respond", "depends_on": [0]}]}"#)
            .with_reply("I don't have the release notes, but here is what I know.");
        let orch = builder(Arc::new(llm), Arc::new(InMemoryBlobStore::new()))
            .with_search_backend(Arc::new(DownBackend))
            .build()
            .await
            .unwrap();
        let id = orch.start_conversation(persona()).await.unwrap();

        let reply = orch.handle_message(&id, "What changed in the last release?").await.unwrap();
        assert!(!reply.trim().is_empty());
        assert!(reply.contains("retrieval_unavailable"));
    }

    #[tokio::test]
    async fn test_retrieved_context_reaches_reply_prompt() {
        let index = KeywordIndex::default();
        index
            .index_document("policy.md", "Refunds are accepted within 30 days of purchase.", None)
            .unwrap();
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_reply(r#"{"steps": [{"kind": "retrieve", "query": "refunds purchase"}, {"kind": "respond"}]}"#)
                .with_reply("Within 30 days."),
        );
        let orch = builder(llm.clone(), Arc::new(InMemoryBlobStore::new()))
            .with_search_backend(Arc::new(index))
            .build()
            .await
            .unwrap();
        let id = orch.start_conversation(persona()).await.unwrap();

        assert_eq!(orch.handle_message(&id, "How long do refunds take?").await.unwrap(), "Within 30 days.");
        let calls = llm.calls();
        let respond_system = &calls[1][0].content;
        assert!(respond_system.contains("Refunds are accepted within 30 days"));
        assert!(respond_system.contains("policy.md"));
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected_without_touching_state() {
        let orch = orchestrator(ScriptedLlmClient::new()).await;
        let id = orch.start_conversation(persona()).await.unwrap();
        assert!(matches!(
            orch.handle_message(&id, "   ").await,
            Err(AgentError::InvalidInput(_))
        ));
        let state = orch.snapshot(&id).await.unwrap();
        assert!(state.memory.entries.is_empty());
        assert_eq!(state.exchanges, 0);
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let orch = orchestrator(ScriptedLlmClient::new()).await;
        assert!(matches!(
            orch.handle_message("nope", "hi").await,
            Err(AgentError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deterministic_with_scripted_llm_and_fixed_clock() {
        async fn run() -> hive::AgentState {
            let llm = ScriptedLlmClient::new()
                .with_reply(
                    r#"{"steps": [{"kind": "invoke_tool", "tool": "calculator", "args": {"expression": "6*7"}},
                                  {"kind": "respond", "depends_on": [0]}]}"#,
                )
                .with_reply("The answer is 42.");
            let orch = orchestrator(llm).await;
            let id = orch.open_conversation("det", persona()).await.unwrap();
            orch.handle_message(&id, "What is six times seven?").await.unwrap();
            orch.snapshot(&id).await.unwrap()
        }
        let first = run().await;
        let second = run().await;
        assert_eq!(first, second);
        assert_eq!(first.memory.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_persist_and_resume_after_restart() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        let llm = ScriptedLlmClient::new().with_reply(RESPOND_ONLY).with_reply("Nice to meet you, Bob.");
        let orch = builder(Arc::new(llm), store.clone()).build().await.unwrap();
        let id = orch.open_conversation("alice", persona()).await.unwrap();
        orch.handle_message(&id, "My name is Bob.").await.unwrap();
        let before = orch.snapshot(&id).await.unwrap();
        orch.end_conversation(&id).await.unwrap();
        assert!(matches!(
            orch.handle_message(&id, "hello?").await,
            Err(AgentError::ConversationNotFound(_))
        ));

        // 新进程：同一存储
        let llm = Arc::new(ScriptedLlmClient::new().with_reply(RESPOND_ONLY).with_reply("Your name is Bob."));
        let restarted = builder(llm.clone(), store).build().await.unwrap();
        let saved = restarted.list_saved().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].conversation_id, "alice");
        assert_eq!(saved[0].exchanges, 1);

        let id = restarted.resume_conversation("alice").await.unwrap();
        assert_eq!(restarted.snapshot(&id).await.unwrap(), before);
        restarted.handle_message(&id, "What's my name?").await.unwrap();
        // 规划提示包含恢复的历史
        assert!(llm.calls()[0][0].content.contains("My name is Bob."));
        let history = restarted.state_history(&id, 10).await.unwrap();
        assert_eq!(history.iter().map(|s| s.exchanges).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_resume_with_full_memory_matches_saved_state() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        let mut config = AppConfig::default();
        config.memory.max_entries = 2;
        config.memory.compact_batch = 1;

        let llm = ScriptedLlmClient::new().with_reply(RESPOND_ONLY).with_reply("2 + 2 = 4.");
        let orch = AgentBuilder::new(config.clone())
            .with_llm(Arc::new(llm))
            .with_blob_store(store.clone())
            .with_clock(fixed_clock())
            .with_search_backend(Arc::new(KeywordIndex::default()))
            .build()
            .await
            .unwrap();
        let id = orch.open_conversation("full", persona()).await.unwrap();
        orch.handle_message(&id, "What's 2+2?").await.unwrap();
        let saved = orch.snapshot(&id).await.unwrap();
        assert_eq!(saved.memory.entries.len(), 2);
        assert!(saved.memory.summary.is_empty());
        orch.end_conversation(&id).await.unwrap();

        let restarted = AgentBuilder::new(config)
            .with_llm(Arc::new(ScriptedLlmClient::new()))
            .with_blob_store(store)
            .with_clock(fixed_clock())
            .with_search_backend(Arc::new(KeywordIndex::default()))
            .build()
            .await
            .unwrap();
        let id = restarted.resume_conversation("full").await.unwrap();
        assert_eq!(restarted.snapshot(&id).await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_resume_unknown_conversation_is_state_not_found() {
        let orch = orchestrator(ScriptedLlmClient::new()).await;
        assert!(matches!(
            orch.resume_conversation("ghost").await,
            Err(AgentError::StateNotFound(_))
        ));
        assert!(matches!(
            orch.open_conversation("bad/id", persona()).await,
            Err(AgentError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_messages_in_one_conversation_are_queued() {
        let orch = Arc::new(
            builder(Arc::new(MockLlmClient), Arc::new(InMemoryBlobStore::new()))
                .build()
                .await
                .unwrap(),
        );
        let id = orch.start_conversation(persona()).await.unwrap();
        let (a, b) = tokio::join!(orch.handle_message(&id, "first"), orch.handle_message(&id, "second"));
        assert_eq!(a.unwrap(), "Echo from Mock: first");
        assert_eq!(b.unwrap(), "Echo from Mock: second");

        let state = orch.snapshot(&id).await.unwrap();
        let transcript: Vec<(MemoryRole, String)> = state
            .memory
            .entries
            .iter()
            .map(|e| (e.role, e.content.clone()))
            .collect();
        assert_eq!(
            transcript,
            vec![
                (MemoryRole::User, "first".to_string()),
                (MemoryRole::Agent, "Echo from Mock: first".to_string()),
                (MemoryRole::User, "second".to_string()),
                (MemoryRole::Agent, "Echo from Mock: second".to_string()),
            ]
        );
        assert_eq!(state.exchanges, 2);
    }

    #[tokio::test]
    async fn test_distinct_conversations_run_in_parallel() {
        let orch = Arc::new(
            builder(Arc::new(MockLlmClient), Arc::new(InMemoryBlobStore::new()))
                .build()
                .await
                .unwrap(),
        );
        let a = orch.start_conversation(persona()).await.unwrap();
        let b = orch.start_conversation(persona()).await.unwrap();

        let mut handles = Vec::new();
        for (id, text) in [(a.clone(), "from a"), (b.clone(), "from b")] {
            let orch = orch.clone();
            handles.push(tokio::spawn(async move { orch.handle_message(&id, text).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let state_a = orch.snapshot(&a).await.unwrap();
        let state_b = orch.snapshot(&b).await.unwrap();
        assert_eq!(state_a.memory.entries[0].content, "from a");
        assert_eq!(state_b.memory.entries[0].content, "from b");
        assert_eq!(state_a.memory.entries.len(), 2);
        assert_eq!(orch.live_conversations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_restores_last_persisted_state() {
        let llm = ScriptedLlmClient::new()
            .with_reply(RESPOND_ONLY)
            .with_reply("Hi!")
            .with_reply(r#"{"steps": [{"kind": "invoke_tool", "tool": "slow"}, {"kind": "respond"}]}"#);
        let orch = Arc::new(
            builder(Arc::new(llm), Arc::new(InMemoryBlobStore::new()))
                .with_tool(ToolSpec::custom(Arc::new(SlowTool::new(Duration::from_secs(30), usize::MAX))))
                .build()
                .await
                .unwrap(),
        );
        let id = orch.start_conversation(persona()).await.unwrap();
        orch.handle_message(&id, "hello").await.unwrap();
        let persisted = orch.snapshot(&id).await.unwrap();

        let mut phase = orch.subscribe_phase(&id).await.unwrap();
        let task = {
            let orch = orch.clone();
            let id = id.clone();
            tokio::spawn(async move { orch.handle_message(&id, "do the slow thing").await })
        };
        phase
            .wait_for(|p| matches!(p, AgentPhase::Executing { step: 0, .. }))
            .await
            .unwrap();
        orch.cancel(&id).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(result, Err(AgentError::Cancelled));
        assert_eq!(orch.snapshot(&id).await.unwrap(), persisted);
        assert_eq!(orch.phase(&id).await.unwrap(), AgentPhase::Idle);
    }

    #[tokio::test]
    async fn test_aborted_caller_restores_last_persisted_state() {
        let llm = ScriptedLlmClient::new()
            .with_reply(RESPOND_ONLY)
            .with_reply("Hi!")
            .with_reply(r#"{"steps": [{"kind": "invoke_tool", "tool": "slow"}, {"kind": "respond"}]}"#)
            .with_reply(RESPOND_ONLY)
            .with_reply("Back again.");
        let orch = Arc::new(
            builder(Arc::new(llm), Arc::new(InMemoryBlobStore::new()))
                .with_tool(ToolSpec::custom(Arc::new(SlowTool::new(Duration::from_secs(30), 1))))
                .build()
                .await
                .unwrap(),
        );
        let id = orch.start_conversation(persona()).await.unwrap();
        orch.handle_message(&id, "hello").await.unwrap();
        let persisted = orch.snapshot(&id).await.unwrap();
        assert_eq!(persisted.memory.entries.len(), 2);

        let mut phase = orch.subscribe_phase(&id).await.unwrap();
        let task = {
            let orch = orch.clone();
            let id = id.clone();
            tokio::spawn(async move { orch.handle_message(&id, "do the slow thing").await })
        };
        phase
            .wait_for(|p| matches!(p, AgentPhase::Executing { step: 0, .. }))
            .await
            .unwrap();
        task.abort();
        let joined = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap();
        assert!(joined.unwrap_err().is_cancelled());

        assert_eq!(orch.phase(&id).await.unwrap(), AgentPhase::Idle);
        assert_eq!(orch.snapshot(&id).await.unwrap(), persisted);

        assert_eq!(orch.handle_message(&id, "still there?").await.unwrap(), "Back again.");
        assert_eq!(orch.snapshot(&id).await.unwrap().memory.entries.len(), 4);
    }

    #[tokio::test]
    async fn test_resumable_plan_continues_from_checkpoint() {
        let llm = ScriptedLlmClient::new()
            .with_reply(
                r#"{"resumable": true, "steps": [
                    {"kind": "invoke_tool", "tool": "calculator", "args": {"expression": "1+1"}},
                    {"kind": "invoke_tool", "tool": "slow", "args": {}},
                    {"kind": "respond"}]}"#,
            )
            .with_reply("All steps done.");
        let orch = Arc::new(
            builder(Arc::new(llm), Arc::new(InMemoryBlobStore::new()))
                .with_tool(ToolSpec::custom(Arc::new(SlowTool::new(Duration::from_secs(30), 1))))
                .build()
                .await
                .unwrap(),
        );
        let id = orch.start_conversation(persona()).await.unwrap();

        let mut phase = orch.subscribe_phase(&id).await.unwrap();
        let task = {
            let orch = orch.clone();
            let id = id.clone();
            tokio::spawn(async move { orch.handle_message(&id, "long task").await })
        };
        phase
            .wait_for(|p| matches!(p, AgentPhase::Executing { step: 1, .. }))
            .await
            .unwrap();
        orch.cancel(&id).await.unwrap();
        assert_eq!(task.await.unwrap(), Err(AgentError::Cancelled));

        // 检查点在第 0 步之后写入
        let state = orch.snapshot(&id).await.unwrap();
        let checkpoint = state.checkpoint.clone().unwrap();
        assert_eq!(checkpoint.next_step, 1);
        assert_eq!(state.memory.entries.len(), 2);

        let reply = orch.resume_checkpoint(&id).await.unwrap();
        assert_eq!(reply.as_deref(), Some("All steps done."));
        let state = orch.snapshot(&id).await.unwrap();
        assert!(state.checkpoint.is_none());
        assert_eq!(state.exchanges, 1);
        let roles: Vec<MemoryRole> = state.memory.entries.iter().map(|e| e.role).collect();
        assert_eq!(
            roles,
            vec![MemoryRole::User, MemoryRole::Tool, MemoryRole::Tool, MemoryRole::Agent]
        );
        assert_eq!(orch.resume_checkpoint(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persist_failure_continues_in_memory() {
        let llm = ScriptedLlmClient::new().with_reply(RESPOND_ONLY).with_reply("ok");
        let orch = builder(Arc::new(llm), Arc::new(ReadOnlyStore)).build().await.unwrap();
        let id = orch.start_conversation(persona()).await.unwrap();
        assert_eq!(orch.handle_message(&id, "hello").await.unwrap(), "ok");
        assert_eq!(orch.snapshot(&id).await.unwrap().exchanges, 1);
        assert!(matches!(
            orch.end_conversation(&id).await,
            Err(AgentError::StatePersist(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_and_delete_conversation() {
        let llm = ScriptedLlmClient::new().with_reply(RESPOND_ONLY).with_reply("noted");
        let orch = orchestrator(llm).await;
        let id = orch.open_conversation("scratch", persona()).await.unwrap();
        orch.handle_message(&id, "remember this").await.unwrap();

        orch.clear_memory(&id).await.unwrap();
        let state = orch.snapshot(&id).await.unwrap();
        assert!(state.memory.entries.is_empty());
        assert_eq!(state.exchanges, 1);

        orch.delete_conversation(&id).await.unwrap();
        assert!(orch.list_saved().await.unwrap().is_empty());
        assert!(orch.state_history(&id, 5).await.unwrap().is_empty());
        assert!(matches!(
            orch.snapshot(&id).await,
            Err(AgentError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_events_are_streamed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let llm = ScriptedLlmClient::new().with_reply(RESPOND_ONLY).with_reply("hey");
        let orch = builder(Arc::new(llm), Arc::new(InMemoryBlobStore::new()))
            .with_event_sender(tx)
            .build()
            .await
            .unwrap();
        let id = orch.start_conversation(persona()).await.unwrap();
        orch.handle_message(&id, "hi").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                PlanEvent::Planning { .. } => "planning",
                PlanEvent::PlanReady { .. } => "plan_ready",
                PlanEvent::StepStarted { .. } => "step_started",
                PlanEvent::StepFinished { .. } => "step_finished",
                PlanEvent::StepFailed { .. } => "step_failed",
                PlanEvent::ResponseReady { .. } => "response_ready",
            });
        }
        assert_eq!(kinds, vec!["planning", "plan_ready", "step_started", "response_ready"]);
    }

    #[tokio::test]
    async fn test_invalid_plans_fall_back_to_direct_reply() {
        let llm = ScriptedLlmClient::new()
            .with_reply("I think I should just answer.")
            .with_reply(r#"{"steps": []}"#)
            .with_reply(r#"{"steps": [{"kind": "respond"}, {"kind": "reason", "instruction": "x"}]}"#)
            .with_reply("Direct answer.");
        let orch = orchestrator(llm).await;
        let id = orch.start_conversation(persona()).await.unwrap();
        assert_eq!(orch.handle_message(&id, "hi").await.unwrap(), "Direct answer.");
    }

    #[tokio::test]
    async fn test_shutdown_persists_live_conversations() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        let orch = builder(Arc::new(MockLlmClient), store.clone()).build().await.unwrap();
        orch.open_conversation("one", persona()).await.unwrap();
        orch.open_conversation("two", persona()).await.unwrap();
        orch.shutdown().await;
        assert!(orch.live_conversations().await.is_empty());
        let saved = orch.list_saved().await.unwrap();
        assert_eq!(
            saved.iter().map(|s| s.conversation_id.as_str()).collect::<Vec<_>>(),
            vec!["one", "two"]
        );
    }
}
