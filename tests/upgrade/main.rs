use ratchet::control::{COMPLETE, ControlState, DOWNGRADED};
use ratchet::error::Error;
use ratchet::{Ratchet, Target, UpgradeFile, UpgradeOptions};
use ratchet_core::testing::MemoryExecutor;

mod runner;
use runner::{Recorder, shop};

fn exact(version: &str) -> Target {
    Target::Exact(version.to_string())
}

#[tokio::test]
async fn upgrades_to_latest() {
    let executor = MemoryExecutor::new();
    let recorder = Recorder::new();
    let mut ratchet = shop(&executor).with_progress(recorder.clone());

    let report = ratchet.upgrade(&Target::Latest).await.unwrap();
    let targets: Vec<&str> = report.iter_results().map(|r| r.target()).collect();
    assert_eq!(targets, ["1.0", "1.0.1", "1.0.2", "1.0.3", "1.1"]);
    assert!(report.iter_results().all(|r| r.is_applied()));
    assert_eq!(report.version(), Some("1.1"));

    let state = executor.control().unwrap();
    assert_eq!(state.version(), Some("1.1"));
    assert_eq!(state.in_flight(), None);
    assert_eq!(state.statements, 0);

    let progress = recorder.progress();
    assert_eq!(progress[..5], ["1.0 1", "1.0 2", "- 0", "1.0.1 1", "- 0"]);
    assert_eq!(recorder.events().last().unwrap(), "complete at 1.1");
}

const TWO_BY_TWO: &str = r#"
--* SETUP "" --> "1.0"
CREATE TABLE a (id int)
GO
CREATE TABLE b (id int)
GO
--* END SETUP

--* UPGRADE "1.0" --> "1.1"
ALTER TABLE a ADD name text
GO
ALTER TABLE b ADD name text
GO
--* END UPGRADE
"#;

#[tokio::test]
async fn counter_restarts_for_each_segment() {
    let executor = MemoryExecutor::new();
    let recorder = Recorder::new();
    let file = UpgradeFile::parse(None, TWO_BY_TWO).unwrap();
    let mut ratchet = Ratchet::new(file, executor.clone()).with_progress(recorder.clone());

    ratchet.upgrade(&Target::Latest).await.unwrap();

    assert_eq!(
        recorder.progress(),
        ["1.0 1", "1.0 2", "- 0", "1.1 1", "1.1 2", "- 0"]
    );
    assert_eq!(executor.inspect(|s| s.commits), 4);
}

#[tokio::test]
async fn included_file_runs_inside_its_segment() {
    let executor = MemoryExecutor::new();
    let recorder = Recorder::new();
    let mut ratchet = shop(&executor).with_progress(recorder.clone());

    ratchet.upgrade(&exact("1.0.3")).await.unwrap();

    assert!(recorder.events().contains(&"section 1 Views".to_string()));
    let committed = executor.committed();
    assert!(
        committed
            .last()
            .unwrap()
            .starts_with("CREATE VIEW customer_orders AS")
    );
}

#[tokio::test]
async fn ignored_error_is_suppressed() {
    let executor = MemoryExecutor::new();
    executor.fail_on("'root'", "23505");
    let recorder = Recorder::new();
    let mut ratchet = shop(&executor).with_progress(recorder.clone());

    let report = ratchet.upgrade(&exact("1.0.2")).await.unwrap();

    let last = report.iter_results().last().unwrap();
    assert_eq!(last.suppressed(), 1);
    assert!(recorder.events().contains(&"suppressed 23505".to_string()));
    assert!(
        !executor
            .committed()
            .iter()
            .any(|s| s.contains("'root'"))
    );
}

#[tokio::test]
async fn prefix_target_goes_to_the_deepest_match() {
    let executor = MemoryExecutor::new();
    let mut ratchet = shop(&executor);

    let report = ratchet.upgrade(&"1.0.*".parse().unwrap()).await.unwrap();

    assert_eq!(report.count(), 4);
    assert_eq!(report.version(), Some("1.0.3"));
}

#[tokio::test]
async fn no_upgrade_needed_at_target() {
    let executor = MemoryExecutor::new();
    let recorder = Recorder::new();
    let mut ratchet = shop(&executor).with_progress(recorder.clone());
    ratchet.upgrade(&Target::Latest).await.unwrap();
    let statements = executor.committed().len();

    let report = ratchet.upgrade(&Target::Latest).await.unwrap();

    assert_eq!(report.count(), 0);
    assert_eq!(executor.committed().len(), statements);
    assert_eq!(recorder.events().last().unwrap(), "no upgrade needed at 1.1");
}

#[tokio::test]
async fn failed_statement_is_resumed() {
    let executor = MemoryExecutor::new();
    executor.fail_once("placed_at", "42701");
    let mut ratchet = shop(&executor);

    let res = ratchet.upgrade(&Target::Latest).await;
    let (source, report) = match res {
        Err(Error::Partial { source, report }) => (source, report),
        other => panic!("expected a partial failure, got {other:?}"),
    };
    assert!(matches!(*source, Error::Statement { .. }));
    assert!(report.to_string().contains("\"1.0.3\""));

    let state = executor.control().unwrap();
    assert_eq!(state.version(), Some("1.0.3"));
    assert_eq!(state.in_flight(), Some("1.1"));
    assert_eq!(state.statements, 1);
    let failed = executor.history().into_iter().last().unwrap();
    assert!(failed.result.unwrap().starts_with("FAILED"));

    let report = ratchet.upgrade(&Target::Latest).await.unwrap();
    let results = report.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].resumed_from(), 1);
    assert_eq!(results[0].executed(), 1);
    assert_eq!(results[0].statements(), 2);

    let committed = executor.committed();
    let total = committed.iter().filter(|s| s.contains("ADD total")).count();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn interrupted_run_continues() {
    let executor = MemoryExecutor::new();
    let recorder = Recorder::new();
    let ratchet = shop(&executor);
    let interrupt = ratchet.interrupt_handle();
    let mut ratchet = ratchet.with_progress(recorder.interrupt_after("email", interrupt));

    let res = ratchet.upgrade(&Target::Latest).await;
    let source = match res {
        Err(Error::Partial { source, .. }) => source,
        other => panic!("expected a partial failure, got {other:?}"),
    };
    assert!(matches!(*source, Error::Interrupted));
    assert_eq!(
        executor.control(),
        Some(ControlState {
            version: Some("1.0".into()),
            target: Some("1.0.1".into()),
            statements: 1,
        })
    );

    let report = ratchet.upgrade(&Target::Latest).await.unwrap();
    let first = report.iter_results().next().unwrap();
    assert_eq!(first.target(), "1.0.1");
    assert_eq!(first.resumed_from(), 1);
    assert_eq!(first.executed(), 0);
    assert_eq!(report.version(), Some("1.1"));

    let committed = executor.committed();
    let email = committed.iter().filter(|s| s.contains("email")).count();
    assert_eq!(email, 1);
}

#[tokio::test]
async fn in_flight_segment_cannot_be_abandoned() {
    let executor = MemoryExecutor::new();
    executor.set_control(ControlState {
        version: Some("1.0".into()),
        target: Some("1.0.1".into()),
        statements: 1,
    });
    let mut ratchet = shop(&executor);

    let res = ratchet.upgrade(&exact("1.0")).await;
    assert!(matches!(res, Err(Error::ControlState(_))));

    let report = ratchet.upgrade(&exact("1.0.2")).await.unwrap();
    let targets: Vec<&str> = report.iter_results().map(|r| r.target()).collect();
    assert_eq!(targets, ["1.0.1", "1.0.2"]);
}

#[tokio::test]
async fn in_flight_segment_missing_from_the_file() {
    let executor = MemoryExecutor::new();
    executor.set_control(ControlState {
        version: Some("1.0".into()),
        target: Some("2.0".into()),
        statements: 3,
    });
    let mut ratchet = shop(&executor);

    let res = ratchet.upgrade(&Target::Latest).await;
    assert!(matches!(res, Err(Error::ControlState(_))));
}

#[tokio::test]
async fn plan_runs_nothing() {
    let executor = MemoryExecutor::new();
    let mut ratchet = shop(&executor);

    let report = ratchet.plan(&Target::Latest).await.unwrap();

    let statements: Vec<i64> = report.iter_results().map(|r| r.statements()).collect();
    assert_eq!(statements, [2, 1, 2, 0, 2]);
    assert!(report.iter_results().all(|r| !r.is_applied()));
    assert!(executor.committed().is_empty());
    assert!(executor.control().is_none());
}

#[tokio::test]
async fn plan_shows_resume_position() {
    let executor = MemoryExecutor::new();
    executor.set_control(ControlState {
        version: Some("1.0.3".into()),
        target: Some("1.1".into()),
        statements: 1,
    });
    let mut ratchet = shop(&executor);

    let report = ratchet.plan(&Target::Latest).await.unwrap();

    let results = report.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].resumed_from(), 1);
}

#[tokio::test]
async fn downgrade_needs_permission() {
    let executor = MemoryExecutor::new();
    let mut ratchet = shop(&executor);
    ratchet.upgrade(&Target::Latest).await.unwrap();

    let res = ratchet.upgrade(&exact("1.0.3")).await;
    assert!(matches!(res, Err(Error::UnreachableTarget { .. })));

    let mut ratchet = ratchet.with_options(UpgradeOptions::default().allow_downgrade(true));
    let report = ratchet.upgrade(&exact("1.0.3")).await.unwrap();
    assert_eq!(report.version(), Some("1.0.3"));

    let history = ratchet.history().await.unwrap();
    assert_eq!(history.version(), Some("1.0.3"));
    let undone = history
        .records()
        .iter()
        .find(|r| r.target == "1.1" && r.source.as_deref() == Some("1.0.3"))
        .unwrap();
    assert_eq!(undone.result.as_deref(), Some(DOWNGRADED));
    assert!(history.completed().all(|r| r.target != "1.1"));
}

#[tokio::test]
async fn targets_lists_tips() {
    let executor = MemoryExecutor::new();
    let mut ratchet = shop(&executor);

    let all = ratchet.targets(false, None).await.unwrap();
    assert_eq!(all, ["1.0", "1.0.1", "1.0.2", "1.0.3", "1.1"]);

    let tips = ratchet.targets(true, Some("1.0")).await.unwrap();
    assert_eq!(tips, ["1.0.3"]);
}

#[tokio::test]
async fn history_is_json() {
    let executor = MemoryExecutor::new();
    let mut ratchet = shop(&executor);
    ratchet.upgrade(&exact("1.0.1")).await.unwrap();

    let history = ratchet.history().await.unwrap();
    assert_eq!(history.completed().count(), 2);

    let json = history.to_json().unwrap();
    assert!(json.contains(COMPLETE));
    assert!(json.contains("\"version\":\"1.0.1\""));
}
