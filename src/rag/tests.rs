use super::*;
use crate::database::sessions::{InMemorySessionStore, Role};
use crate::embeddings::DocumentChunk;
use crate::embeddings::testing::HashingEmbedder;
use crate::llm::testing::ScriptedChatModel;
use crate::loaders::Metadata;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    index: Arc<VectorIndexStore>,
    sessions: Arc<InMemorySessionStore>,
    model: Arc<ScriptedChatModel>,
    orchestrator: Orchestrator,
}

async fn harness(model: ScriptedChatModel, chunks: &[&str]) -> Harness {
    let dir = TempDir::new().expect("should create TempDir");
    let index = Arc::new(VectorIndexStore::new(
        dir.path().join("vector_db"),
        Arc::new(HashingEmbedder::new(64)),
    ));
    if !chunks.is_empty() {
        index
            .add(
                chunks
                    .iter()
                    .map(|text| DocumentChunk::new(*text, Metadata::new()))
                    .collect(),
            )
            .await
            .expect("should add chunks");
    }

    let sessions = Arc::new(InMemorySessionStore::new());
    let model = Arc::new(model);
    let orchestrator = Orchestrator::new(
        Arc::clone(&index),
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&model) as Arc<dyn ChatModel>,
        &Config::default(),
    );

    Harness {
        _dir: dir,
        index,
        sessions,
        model,
        orchestrator,
    }
}

async fn drain(stream: AnswerStream) -> Vec<AnswerEvent> {
    stream.collect().await
}

#[test]
fn system_prompt_substitutes_persona() {
    let prompt = system_prompt(&AssistantConfig {
        job: "support agent".to_string(),
        skills: "printers".to_string(),
    });
    assert_eq!(
        prompt,
        "\nYou are a support agent, specialized in printers.\nWhen answering questions:\n1. First consult the provided context from the knowledge base\n2. Then consider the conversation history\n3. Finally provide a comprehensive answer\n"
    );
}

#[test]
fn human_prompt_layout() {
    assert_eq!(
        human_prompt("chunk one\n\nchunk two", "What?"),
        "Context:\nchunk one\n\nchunk two\n\nQuestion: What?"
    );
}

#[tokio::test]
async fn context_is_single_chunk_verbatim() {
    let h = harness(
        ScriptedChatModel::new(&["X200"]),
        &["The product model is X200."],
    )
    .await;

    let retrieved = h
        .orchestrator
        .retrieve_context("What is the product model?")
        .await
        .expect("retrieval");

    assert_eq!(retrieved.hits.len(), 1);
    assert_eq!(retrieved.context, "The product model is X200.");
}

#[tokio::test]
async fn context_joins_hits_in_order() {
    let h = harness(
        ScriptedChatModel::new(&[]),
        &["battery life twelve hours", "battery charger included", "shipping is free"],
    )
    .await;

    let retrieved = h
        .orchestrator
        .retrieve_context("battery")
        .await
        .expect("retrieval");
    assert_eq!(retrieved.hits.len(), 3);

    let expected: Vec<&str> = retrieved
        .hits
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect();
    assert_eq!(retrieved.context, expected.join("\n\n"));
}

#[tokio::test]
async fn completed_turn_is_appended_to_history() {
    let h = harness(
        ScriptedChatModel::new(&["The model ", "is X200."]),
        &["The product model is X200."],
    )
    .await;

    let events = drain(
        h.orchestrator
            .answer("s1", "What is the product model?")
            .await
            .expect("answer should start"),
    )
    .await;

    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], AnswerEvent::Fragment(f) if f == "The model "));
    assert!(matches!(&events[1], AnswerEvent::Fragment(f) if f == "is X200."));
    assert!(matches!(&events[2], AnswerEvent::Completed { answer } if answer == "The model is X200."));

    let history = h.sessions.get_or_create("s1").await.expect("history");
    assert_eq!(
        history,
        vec![
            ChatMessage::user("What is the product model?"),
            ChatMessage::assistant("The model is X200."),
        ]
    );

    let prompt = h.model.last_prompt().expect("prompt recorded");
    assert!(prompt.history.is_empty());
    assert_eq!(
        prompt.human,
        "Context:\nThe product model is X200.\n\nQuestion: What is the product model?"
    );
}

#[tokio::test]
async fn second_turn_sees_first_turn_history() {
    let h = harness(ScriptedChatModel::new(&["ok"]), &["anything"]).await;

    for question in ["first", "second"] {
        h.orchestrator
            .answer("s", question)
            .await
            .expect("answer should start")
            .collect_answer()
            .await
            .expect("answer should complete");
    }

    let prompt = h.model.last_prompt().expect("prompt recorded");
    let roles: Vec<Role> = prompt.history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(prompt.history[0].content, "first");
    assert_eq!(h.sessions.get_or_create("s").await.expect("history").len(), 4);
}

#[tokio::test]
async fn mid_stream_failure_is_signalled_and_not_recorded() {
    let h = harness(
        ScriptedChatModel::new(&["partial ", "never sent"]).failing_after(1),
        &["context"],
    )
    .await;

    let events = drain(
        h.orchestrator
            .answer("s", "question")
            .await
            .expect("answer should start"),
    )
    .await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], AnswerEvent::Fragment(f) if f == "partial "));
    assert!(matches!(&events[1], AnswerEvent::Failed(RagError::Provider(_))));
    assert!(events[1].is_terminal());
    assert!(h.sessions.get_or_create("s").await.expect("history").is_empty());
}

#[tokio::test]
async fn refused_request_fails_before_streaming() {
    let h = harness(ScriptedChatModel::refusing(), &[]).await;

    let result = h.orchestrator.answer("s", "question").await;
    assert!(matches!(result, Err(RagError::Provider(_))));

    // The session must be usable again afterwards
    tokio::time::timeout(
        Duration::from_secs(1),
        h.orchestrator.clear_session("s"),
    )
    .await
    .expect("session lock released")
    .expect("clear succeeds");
    assert!(h.orchestrator.locks.is_empty());
}

#[tokio::test]
async fn failed_turns_leave_no_lock_entries() {
    let h = harness(ScriptedChatModel::refusing(), &["context"]).await;

    for n in 0..100 {
        let result = h.orchestrator.answer(&format!("user-{}", n), "question").await;
        assert!(result.is_err());
    }
    assert!(h.orchestrator.locks.is_empty());

    let h = harness(
        ScriptedChatModel::new(&["partial ", "lost"]).failing_after(1),
        &["context"],
    )
    .await;
    let events = drain(
        h.orchestrator
            .answer("s", "question")
            .await
            .expect("answer should start"),
    )
    .await;
    assert!(matches!(events.last(), Some(AnswerEvent::Failed(_))));
    assert!(h.orchestrator.locks.is_empty());
}

#[tokio::test]
async fn empty_index_still_answers() {
    let h = harness(ScriptedChatModel::new(&["no context"]), &[]).await;
    assert_eq!(h.index.count().await, 0);

    let answer = h
        .orchestrator
        .answer("s", "anything?")
        .await
        .expect("answer should start")
        .collect_answer()
        .await
        .expect("answer should complete");

    assert_eq!(answer, "no context");
    let prompt = h.model.last_prompt().expect("prompt recorded");
    assert_eq!(prompt.human, "Context:\n\n\nQuestion: anything?");
}

#[tokio::test]
async fn dropping_the_stream_releases_the_session() {
    let h = harness(ScriptedChatModel::new(&["a", "b", "c"]), &["context"]).await;

    let stream = h
        .orchestrator
        .answer("s", "question")
        .await
        .expect("answer should start");
    drop(stream);

    let next = tokio::time::timeout(Duration::from_secs(1), h.orchestrator.answer("s", "again"))
        .await
        .expect("session lock released");
    assert!(next.is_ok());
}

#[tokio::test]
async fn clearing_a_session_leaves_others() {
    let h = harness(ScriptedChatModel::new(&["reply"]), &["context"]).await;

    for session in ["a", "b"] {
        h.orchestrator
            .answer(session, "hello")
            .await
            .expect("answer should start")
            .collect_answer()
            .await
            .expect("answer should complete");
    }

    h.orchestrator.clear_session("a").await.expect("clear");
    assert!(h.orchestrator.history("a").await.expect("history").is_empty());
    assert_eq!(h.orchestrator.history("b").await.expect("history").len(), 2);

    h.orchestrator.clear_all_sessions().await.expect("clear all");
    assert!(h.sessions.session_ids().await.expect("ids").is_empty());
}

#[tokio::test]
async fn clearing_all_sessions_waits_for_turns_in_progress() {
    let h = harness(ScriptedChatModel::new(&["reply"]), &["context"]).await;
    h.orchestrator
        .answer("done", "hello")
        .await
        .expect("answer should start")
        .collect_answer()
        .await
        .expect("answer should complete");

    let in_progress = h.orchestrator.locks.lock("busy").await;
    let blocked = tokio::time::timeout(
        Duration::from_millis(100),
        h.orchestrator.clear_all_sessions(),
    )
    .await;
    assert!(blocked.is_err());
    assert_eq!(h.orchestrator.history("done").await.expect("history").len(), 2);

    drop(in_progress);
    h.orchestrator.clear_all_sessions().await.expect("clear all");
    assert!(h.sessions.session_ids().await.expect("ids").is_empty());
    assert!(h.orchestrator.locks.is_empty());
}
