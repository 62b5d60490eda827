use ratchet::error::Error;
use ratchet::executor::SqlxSqliteExecutor;
use ratchet::{Ratchet, Target, UpgradeFile, UpgradeOptions};

const SHOP: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/upgrade/patches/shop.sql");

async fn executor() -> SqlxSqliteExecutor {
    let _ = env_logger::builder().is_test(true).try_init();
    SqlxSqliteExecutor::new("sqlite::memory:").await.unwrap()
}

#[tokio::test]
async fn upgrades_and_downgrades_an_in_memory_database() {
    let mut ratchet = Ratchet::open(SHOP, executor().await)
        .unwrap()
        .with_options(UpgradeOptions::default().allow_downgrade(true));

    let report = ratchet.upgrade(&Target::Latest).await.unwrap();
    assert_eq!(report.version(), Some("1.1"));
    let suppressed: usize = report.iter_results().map(|r| r.suppressed()).sum();
    assert_eq!(suppressed, 1);

    let state = ratchet.current_state().await.unwrap();
    assert_eq!(state.version(), Some("1.1"));
    assert_eq!(state.in_flight(), None);

    let report = ratchet
        .upgrade(&Target::Exact("1.0.3".to_string()))
        .await
        .unwrap();
    assert_eq!(report.count(), 1);

    let history = ratchet.history().await.unwrap();
    assert_eq!(history.version(), Some("1.0.3"));
    assert!(history.completed().all(|r| r.target != "1.1"));
}

const CHECKED: &str = r#"
--* DEFINITION
--*   SETUP "" --> "1"
--*   UPGRADE "1" --> "2"
--* END DEFINITION

--* SETUP "" --> "1"
CREATE TABLE items (id integer PRIMARY KEY, name text)
GO
INSERT INTO items (id, name) VALUES (1, 'first')
GO
ASSERT EXISTS MESSAGE "first item is missing" SELECT id FROM items WHERE id = 1
GO
--* END SETUP

--* UPGRADE "1" --> "2"
INSERT INTO items (id, name) VALUES (2, 'second')
GO
INSERT INTO no_such_table (id) VALUES (1)
GO
--* END UPGRADE
"#;

#[tokio::test]
async fn failure_is_recorded_in_the_control_tables() {
    let file = UpgradeFile::parse(None, CHECKED).unwrap();
    let mut ratchet = Ratchet::new(file, executor().await);

    let res = ratchet.upgrade(&Target::Latest).await;
    let source = match res {
        Err(Error::Partial { source, .. }) => source,
        other => panic!("expected a partial failure, got {other:?}"),
    };
    assert!(matches!(*source, Error::Statement { .. }));

    let state = ratchet.current_state().await.unwrap();
    assert_eq!(state.version(), Some("1"));
    assert_eq!(state.in_flight(), Some("2"));
    assert_eq!(state.statements, 1);

    let history = ratchet.history().await.unwrap();
    let failed = history.records().last().unwrap();
    assert_eq!(failed.statement, 2);
    assert!(failed.result.as_deref().unwrap().starts_with("FAILED"));
}
