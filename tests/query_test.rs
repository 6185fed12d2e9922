//! Query and export tests: ordering, paging, filters, last logs and
//! value names.

use trueno_runlog::experiment::{NewLog, NewRun, RunRecord, RunStatus};
use trueno_runlog::{LogFilter, LogStore, RunFilter, StatusFilter, StoreConfig};

async fn store() -> LogStore {
    let store = LogStore::open(StoreConfig::in_memory()).unwrap();
    store.migrate().await.unwrap();
    store
}

async fn paged_store(page_size: usize) -> LogStore {
    let store = LogStore::builder().page_size(page_size).open().unwrap();
    store.migrate().await.unwrap();
    store
}

async fn add_run(store: &LogStore, experiment_id: &str, name: Option<&str>) -> RunRecord {
    let mut run = NewRun::new(experiment_id).status(RunStatus::Running);
    if let Some(name) = name {
        run = run.name(name);
    }
    store.add_run(run).await.unwrap()
}

fn typed(entries: &[(i64, &str)]) -> Vec<NewLog> {
    entries.iter().map(|&(n, t)| NewLog::new(n, t)).collect()
}

// =============================================================================
// get_logs
// =============================================================================

#[tokio::test]
async fn test_logs_ordered_by_experiment_run_number() {
    let store = store().await;
    let b = store.add_experiment("b").await.unwrap();
    let a = store.add_experiment("a").await.unwrap();

    let b_run = add_run(&store, b.experiment_id(), Some("x")).await;
    let a_z = add_run(&store, a.experiment_id(), Some("z")).await;
    let a_unnamed = add_run(&store, a.experiment_id(), None).await;
    let a_m = add_run(&store, a.experiment_id(), Some("m")).await;

    store.add_logs(b_run.run_id(), typed(&[(1, "t")])).await.unwrap();
    store.add_logs(a_z.run_id(), typed(&[(2, "t"), (1, "t")])).await.unwrap();
    store.add_logs(a_unnamed.run_id(), typed(&[(1, "t")])).await.unwrap();
    store.add_logs(a_m.run_id(), typed(&[(3, "t"), (1, "t"), (2, "t")])).await.unwrap();

    let order: Vec<_> = store
        .get_logs(&LogFilter::all())
        .collect_all()
        .await
        .unwrap()
        .into_iter()
        .map(|l| {
            (
                l.experiment_name().to_string(),
                l.run_name().map(str::to_string),
                l.number(),
            )
        })
        .collect();

    let expected = [
        ("a", None, 1),
        ("a", Some("m"), 1),
        ("a", Some("m"), 2),
        ("a", Some("m"), 3),
        ("a", Some("z"), 1),
        ("a", Some("z"), 2),
        ("b", Some("x"), 1),
    ]
    .map(|(e, r, n)| (e.to_string(), r.map(str::to_string), n));
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_log_carries_run_and_experiment() {
    let store = store().await;
    let experiment = store.add_experiment("stroop").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("p01")).await;
    let ids = store
        .add_logs(
            run.run_id(),
            vec![NewLog::new(1, "trial").value("rt", 412).value("correct", true)],
        )
        .await
        .unwrap();

    let logs = store.get_logs(&LogFilter::all()).collect_all().await.unwrap();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.log_id(), ids[0]);
    assert_eq!(log.experiment_id(), experiment.experiment_id());
    assert_eq!(log.experiment_name(), "stroop");
    assert_eq!(log.run_id(), run.run_id());
    assert_eq!(log.run_name(), Some("p01"));
    assert_eq!(log.run_status(), RunStatus::Running);
    assert_eq!(log.log_type(), "trial");
    assert_eq!(log.values()["rt"], 412);
    assert_eq!(log.values()["correct"], true);
}

#[tokio::test]
async fn test_paging_fetches_bounded_pages() {
    let store = paged_store(2).await;
    assert_eq!(store.page_size(), 2);
    let experiment = store.add_experiment("paging").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("r")).await;
    store
        .add_logs(run.run_id(), typed(&[(1, "t"), (2, "t"), (3, "t"), (4, "t"), (5, "t")]))
        .await
        .unwrap();

    let mut cursor = store.get_logs(&LogFilter::all());
    assert_eq!(cursor.pages_fetched(), 0);

    let mut numbers = Vec::new();
    while let Some(log) = cursor.next().await.unwrap() {
        numbers.push(log.number());
    }
    assert_eq!(numbers, [1, 2, 3, 4, 5]);
    assert_eq!(cursor.pages_fetched(), 3);

    // An exhausted cursor stays exhausted.
    assert!(cursor.next().await.unwrap().is_none());
    assert_eq!(cursor.pages_fetched(), 3);
}

#[tokio::test]
async fn test_paging_across_runs_with_same_name() {
    let store = paged_store(1).await;
    let experiment = store.add_experiment("same").await.unwrap();
    let first = add_run(&store, experiment.experiment_id(), Some("dup")).await;
    store.add_logs(first.run_id(), typed(&[(1, "t"), (2, "t")])).await.unwrap();
    store
        .set_run_status(first.run_id(), RunStatus::Canceled)
        .await
        .unwrap();
    let second = add_run(&store, experiment.experiment_id(), Some("dup")).await;
    store.add_logs(second.run_id(), typed(&[(1, "t"), (2, "t")])).await.unwrap();

    let mut cursor = store.get_logs(&LogFilter::all());
    let mut seen = Vec::new();
    while let Some(log) = cursor.next().await.unwrap() {
        seen.push((log.run_id().to_string(), log.number()));
    }
    let (a, b) = (first.run_id().to_string(), second.run_id().to_string());
    assert_eq!(seen, [(a.clone(), 1), (a, 2), (b.clone(), 1), (b, 2)]);
    assert_eq!(cursor.pages_fetched(), 5);
}

#[tokio::test]
async fn test_cursor_sees_writes_between_pages() {
    let store = paged_store(2).await;
    let experiment = store.add_experiment("live").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("r")).await;
    store
        .add_logs(run.run_id(), typed(&[(1, "t"), (2, "t"), (3, "t")]))
        .await
        .unwrap();

    let mut cursor = store.get_logs(&LogFilter::all());
    assert_eq!(cursor.next().await.unwrap().unwrap().number(), 1);

    store.add_logs(run.run_id(), typed(&[(4, "t")])).await.unwrap();

    let mut rest = Vec::new();
    while let Some(log) = cursor.next().await.unwrap() {
        rest.push(log.number());
    }
    assert_eq!(rest, [2, 3, 4]);
}

#[tokio::test]
async fn test_paging_through_resumed_run() {
    let store = paged_store(2).await;
    let experiment = store.add_experiment("resumed").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("r")).await;
    let first: Vec<NewLog> = (1..=5).map(|n| NewLog::new(n, "t").value("attempt", 1)).collect();
    store.add_logs(run.run_id(), first).await.unwrap();

    store.resume_run(run.run_id(), 2).await.unwrap();
    let second: Vec<NewLog> = (3..=4).map(|n| NewLog::new(n, "t").value("attempt", 2)).collect();
    store.add_logs(run.run_id(), second).await.unwrap();

    let mut cursor = store.get_logs(&LogFilter::all());
    let mut seen = Vec::new();
    while let Some(log) = cursor.next().await.unwrap() {
        seen.push((log.number(), log.values()["attempt"].as_i64().unwrap()));
    }
    assert_eq!(seen, [(1, 1), (2, 1), (3, 2), (4, 2)]);
    assert_eq!(cursor.pages_fetched(), 3);
}

#[tokio::test]
async fn test_paging_skips_runs_without_matches() {
    let store = paged_store(1).await;
    let experiment = store.add_experiment("sparse").await.unwrap();
    let a = add_run(&store, experiment.experiment_id(), Some("a")).await;
    let b = add_run(&store, experiment.experiment_id(), Some("b")).await;
    let c = add_run(&store, experiment.experiment_id(), Some("c")).await;
    store.add_logs(a.run_id(), typed(&[(1, "trial"), (2, "info")])).await.unwrap();
    store.add_logs(b.run_id(), typed(&[(1, "info")])).await.unwrap();
    store.add_logs(c.run_id(), typed(&[(1, "info"), (2, "trial")])).await.unwrap();

    let logs = store
        .get_logs(&LogFilter::all().log_types(["trial"]))
        .collect_all()
        .await
        .unwrap();
    let seen: Vec<_> = logs.iter().map(|l| (l.run_name(), l.number())).collect();
    assert_eq!(seen, [(Some("a"), 1), (Some("c"), 2)]);
}

#[tokio::test]
async fn test_cursor_drops_run_leaving_filter() {
    let store = paged_store(1).await;
    let experiment = store.add_experiment("status").await.unwrap();
    let a = add_run(&store, experiment.experiment_id(), Some("a")).await;
    let b = add_run(&store, experiment.experiment_id(), Some("b")).await;
    store.add_logs(a.run_id(), typed(&[(1, "t"), (2, "t")])).await.unwrap();
    store.add_logs(b.run_id(), typed(&[(1, "t")])).await.unwrap();

    let mut cursor = store.get_logs(&LogFilter::all().run_status([RunStatus::Running]));
    assert_eq!(cursor.next().await.unwrap().unwrap().run_id(), a.run_id());

    store
        .set_run_status(a.run_id(), RunStatus::Interrupted)
        .await
        .unwrap();
    let rest: Vec<_> = cursor
        .collect_all()
        .await
        .unwrap()
        .iter()
        .map(|l| (l.run_id().to_string(), l.number()))
        .collect();
    assert_eq!(rest, [(b.run_id().to_string(), 1)]);
}

#[tokio::test]
async fn test_log_filters() {
    let store = store().await;
    let stroop = store.add_experiment("stroop").await.unwrap();
    let flanker = store.add_experiment("flanker").await.unwrap();
    let p1 = add_run(&store, stroop.experiment_id(), Some("p1")).await;
    let p2 = add_run(&store, stroop.experiment_id(), Some("p2")).await;
    let f1 = add_run(&store, flanker.experiment_id(), Some("p1")).await;

    store.add_logs(p1.run_id(), typed(&[(1, "trial"), (2, "info")])).await.unwrap();
    store.add_logs(p2.run_id(), typed(&[(1, "trial")])).await.unwrap();
    store.add_logs(f1.run_id(), typed(&[(1, "info")])).await.unwrap();
    store
        .set_run_status(p2.run_id(), RunStatus::Interrupted)
        .await
        .unwrap();

    let count = |filter: LogFilter| {
        let store = store.clone();
        async move { store.get_logs(&filter).collect_all().await.unwrap().len() }
    };

    assert_eq!(count(LogFilter::all()).await, 4);
    assert_eq!(count(LogFilter::all().log_types(["trial"])).await, 2);
    assert_eq!(count(LogFilter::all().log_types(["info", "trial"])).await, 4);
    assert_eq!(count(LogFilter::all().experiment_names(["stroop"])).await, 3);
    assert_eq!(count(LogFilter::all().experiment_ids([flanker.experiment_id()])).await, 1);
    assert_eq!(count(LogFilter::all().run_names(["p1"])).await, 3);
    assert_eq!(count(LogFilter::all().run_ids([p2.run_id()])).await, 1);
    assert_eq!(
        count(LogFilter::all().run_names(["p1"]).log_types(["info"])).await,
        2
    );
    assert_eq!(
        count(LogFilter::all().run_status(["-interrupted".parse::<StatusFilter>().unwrap()])).await,
        3
    );
    assert_eq!(count(LogFilter::all().run_status([RunStatus::Interrupted])).await, 1);
    assert_eq!(count(LogFilter::all().log_types(Vec::<String>::new())).await, 0);
    assert_eq!(count(LogFilter::all().run_ids(["not-a-run"])).await, 0);
    assert_eq!(count(LogFilter::from(RunFilter::all().names(["p2"]))).await, 1);
}

// =============================================================================
// get_last_logs
// =============================================================================

#[tokio::test]
async fn test_last_logs_per_type() {
    let store = store().await;
    let experiment = store.add_experiment("last").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("r")).await;
    store
        .add_logs(run.run_id(), typed(&[(1, "a"), (2, "b"), (3, "a"), (4, "b"), (5, "a")]))
        .await
        .unwrap();

    let last = store.get_last_logs(&LogFilter::all()).await.unwrap();
    let found: Vec<_> = last.iter().map(|l| (l.log_type.as_str(), l.log.number())).collect();
    assert_eq!(found, [("a", 5), ("b", 4)]);
    assert!(last.iter().all(|l| l.run_id == run.run_id()));
}

#[tokio::test]
async fn test_last_logs_stop_at_first_missing_number() {
    let store = store().await;
    let experiment = store.add_experiment("gap").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("r")).await;
    store
        .add_logs(run.run_id(), typed(&[(1, "a"), (2, "b"), (3, "a"), (5, "b"), (6, "a")]))
        .await
        .unwrap();

    let last = store.get_last_logs(&LogFilter::all()).await.unwrap();
    let found: Vec<_> = last.iter().map(|l| (l.log_type.as_str(), l.log.number())).collect();
    assert_eq!(found, [("a", 3), ("b", 2)]);

    // The gap at 4 hides type b's entry 5 even when only b is asked for.
    let only_b = store
        .get_last_logs(&LogFilter::all().log_types(["b"]))
        .await
        .unwrap();
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].log.number(), 2);

    store.add_logs(run.run_id(), typed(&[(4, "c")])).await.unwrap();
    let last = store.get_last_logs(&LogFilter::all()).await.unwrap();
    let found: Vec<_> = last.iter().map(|l| (l.log_type.as_str(), l.log.number())).collect();
    assert_eq!(found, [("a", 6), ("b", 5), ("c", 4)]);
}

#[tokio::test]
async fn test_last_logs_cutoff_is_not_per_type() {
    let store = store().await;
    let experiment = store.add_experiment("masked").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("r")).await;
    store
        .add_logs(run.run_id(), typed(&[(2, "a"), (3, "b")]))
        .await
        .unwrap();

    // Number 1 is missing, so nothing is confirmed yet.
    assert!(store.get_last_logs(&LogFilter::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_last_logs_ignore_superseded_entries() {
    let store = store().await;
    let experiment = store.add_experiment("superseded").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("r")).await;
    store
        .add_logs(run.run_id(), typed(&[(1, "a"), (2, "a"), (3, "b")]))
        .await
        .unwrap();
    store.resume_run(run.run_id(), 1).await.unwrap();
    store.add_logs(run.run_id(), typed(&[(2, "c")])).await.unwrap();

    let last = store.get_last_logs(&LogFilter::all()).await.unwrap();
    let found: Vec<_> = last.iter().map(|l| (l.log_type.as_str(), l.log.number())).collect();
    assert_eq!(found, [("a", 1), ("c", 2)]);
}

#[tokio::test]
async fn test_last_logs_across_runs() {
    let store = store().await;
    let experiment = store.add_experiment("runs").await.unwrap();
    let r1 = add_run(&store, experiment.experiment_id(), Some("r1")).await;
    let r2 = add_run(&store, experiment.experiment_id(), Some("r2")).await;
    store.add_logs(r1.run_id(), typed(&[(1, "a"), (2, "a")])).await.unwrap();
    store.add_logs(r2.run_id(), typed(&[(1, "a"), (3, "a")])).await.unwrap();

    let last = store.get_last_logs(&LogFilter::all()).await.unwrap();
    let found: Vec<_> = last
        .iter()
        .map(|l| (l.log.run_name().unwrap_or_default().to_string(), l.log.number()))
        .collect();
    assert_eq!(found, [("r1".to_string(), 2), ("r2".to_string(), 1)]);

    let only_r2 = store
        .get_last_logs(&LogFilter::all().run_ids([r2.run_id()]))
        .await
        .unwrap();
    assert_eq!(only_r2.len(), 1);
    assert_eq!(only_r2[0].run_id, r2.run_id());
}

// =============================================================================
// get_log_value_names
// =============================================================================

#[tokio::test]
async fn test_value_names_of_visible_logs() {
    let store = store().await;
    let experiment = store.add_experiment("names").await.unwrap();
    let run = add_run(&store, experiment.experiment_id(), Some("r")).await;
    store
        .add_logs(
            run.run_id(),
            vec![
                NewLog::new(1, "trial").value("rt", 1).value("x", 1),
                NewLog::new(2, "trial").value("y", 2),
                NewLog::new(3, "info").value("note", "hi"),
            ],
        )
        .await
        .unwrap();

    let names = store.get_log_value_names(&LogFilter::all()).await.unwrap();
    assert_eq!(names, ["note", "rt", "x", "y"]);

    let trial_names = store
        .get_log_value_names(&LogFilter::all().log_types(["trial"]))
        .await
        .unwrap();
    assert_eq!(trial_names, ["rt", "x", "y"]);

    // Resuming after 1 supersedes entries 2 and 3 and their names.
    store.resume_run(run.run_id(), 1).await.unwrap();
    store
        .add_logs(run.run_id(), vec![NewLog::new(2, "trial").value("w", 0)])
        .await
        .unwrap();
    let names = store.get_log_value_names(&LogFilter::all()).await.unwrap();
    assert_eq!(names, ["rt", "w", "x"]);
}

#[tokio::test]
async fn test_value_names_empty_store() {
    let store = store().await;
    assert!(store
        .get_log_value_names(&LogFilter::all())
        .await
        .unwrap()
        .is_empty());
}
