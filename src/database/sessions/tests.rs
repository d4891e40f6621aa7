use super::*;
use std::time::Duration;
use tempfile::TempDir;

async fn sqlite_store() -> anyhow::Result<(TempDir, SqliteSessionStore)> {
    let temp_dir = TempDir::new()?;
    let store = SqliteSessionStore::open(&temp_dir.path().join("sessions.db")).await?;
    Ok((temp_dir, store))
}

async fn exercise_contract(store: &dyn SessionStore) -> Result<()> {
    assert!(store.get_or_create("a").await?.is_empty());

    store.append("a", Role::User, "hello").await?;
    store.append("a", Role::Assistant, "hi there").await?;
    store.append_turn("a", "second question", "second answer").await?;
    store.append("b", Role::User, "only for b").await?;

    let history = store.get_or_create("a").await?;
    assert_eq!(
        history,
        vec![
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi there"),
            ChatMessage::user("second question"),
            ChatMessage::assistant("second answer"),
        ]
    );
    assert_eq!(
        store.get_or_create("b").await?,
        vec![ChatMessage::user("only for b")]
    );
    assert_eq!(store.session_ids().await?, vec!["a", "b"]);

    store.clear("a").await?;
    assert!(store.get_or_create("a").await?.is_empty());
    assert_eq!(store.get_or_create("b").await?.len(), 1);

    store.clear_all().await?;
    assert!(store.session_ids().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn in_memory_store_contract() -> Result<()> {
    exercise_contract(&InMemorySessionStore::new()).await
}

#[tokio::test]
async fn sqlite_store_contract() -> anyhow::Result<()> {
    let (_temp_dir, store) = sqlite_store().await?;
    exercise_contract(&store).await?;
    Ok(())
}

#[tokio::test]
async fn sqlite_history_survives_reopen() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("sessions.db");

    {
        let store = SqliteSessionStore::open(&path).await?;
        store.append_turn("durable", "question", "answer").await?;
    }

    let reopened = SqliteSessionStore::open(&path).await?;
    assert_eq!(
        reopened.get_or_create("durable").await?,
        vec![ChatMessage::user("question"), ChatMessage::assistant("answer")]
    );
    Ok(())
}

#[tokio::test]
async fn clearing_unknown_session_is_not_an_error() -> anyhow::Result<()> {
    InMemorySessionStore::new().clear("nobody").await?;
    let (_temp_dir, store) = sqlite_store().await?;
    store.clear("nobody").await?;
    Ok(())
}

#[tokio::test]
async fn open_session_store_follows_configuration() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };

    let memory = open_session_store(&config).await?;
    memory.append("x", Role::System, "memory").await?;
    assert_eq!(memory.session_ids().await?, vec!["x"]);

    config.sessions.backend = SessionBackend::Sqlite;
    let durable = open_session_store(&config).await?;
    durable.append("y", Role::User, "disk").await?;
    assert!(temp_dir.path().join("sessions.db").exists());
    assert_eq!(durable.session_ids().await?, vec!["y"]);
    Ok(())
}

#[test]
fn role_serializes_lowercase() -> anyhow::Result<()> {
    let json = serde_json::to_string(&ChatMessage::assistant("ok"))?;
    assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    assert_eq!(Role::System.to_string(), "system");
    Ok(())
}

mod locks {
    use super::*;

    #[tokio::test]
    async fn same_session_is_serialized() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.acquire("s").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("s").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .expect("waiter task panicked");
    }

    #[tokio::test]
    async fn different_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let _first = locks.acquire("a").await;

        let second = tokio::time::timeout(Duration::from_millis(200), locks.acquire("b")).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn idle_entries_are_released() {
        let locks = SessionLocks::new();
        let guard = locks.acquire("a").await;

        locks.release_idle("a");
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.release_idle("a");
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn dropped_guard_removes_its_entry() {
        let locks = Arc::new(SessionLocks::new());
        let first = locks.lock("a").await;
        let second = locks.lock("b").await;
        assert_eq!(first.session_id(), "a");
        assert_eq!(locks.active_ids(), vec!["a".to_string(), "b".to_string()]);

        drop(first);
        assert_eq!(locks.active_ids(), vec!["b".to_string()]);

        drop(second);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn dropped_guard_keeps_entry_for_waiters() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.lock("s").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("s").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .expect("waiter task panicked");
        assert!(locks.is_empty());
    }
}
