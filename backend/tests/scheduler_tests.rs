//! Background job tests

mod common;

use tokio::sync::watch;

use common::*;
use inventory_engine::config::SchedulerConfig;

#[tokio::test]
async fn test_manual_runs_report_work() {
    let fx = Fixture::new();
    let scheduler = fx.services.scheduler(SchedulerConfig::default());

    let sweep = scheduler.run_expiry_sweep().await.unwrap().unwrap();
    assert_eq!(sweep.groups_released, 0);
    let commits = scheduler.run_auto_commit().await.unwrap().unwrap();
    assert_eq!(commits.auto_committed, 0);
    assert_eq!(scheduler.run_retention().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_disabled_scheduler_spawns_nothing() {
    let fx = Fixture::new();
    let config = SchedulerConfig {
        enabled: false,
        ..SchedulerConfig::default()
    };
    let (_tx, rx) = watch::channel(false);
    assert!(fx.services.scheduler(config).spawn(rx).is_empty());
}

#[tokio::test]
async fn test_jobs_stop_on_shutdown() {
    let fx = Fixture::new();
    let (tx, rx) = watch::channel(false);
    let jobs = fx.services.scheduler(SchedulerConfig::default()).spawn(rx);
    assert_eq!(jobs.len(), 3);

    tx.send(true).unwrap();
    for job in jobs {
        tokio::time::timeout(std::time::Duration::from_secs(5), job)
            .await
            .unwrap()
            .unwrap();
    }
}
