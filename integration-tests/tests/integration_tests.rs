// End-to-end tests of the job orchestrator over the in-memory capabilities
// These tests exercise the public façade the way a transport layer would

use chrono::NaiveDate;
use common::bootstrap::{init_in_memory_runtime, InMemoryRuntime};
use common::config::Settings;
use common::errors::ServiceError;
use common::models::{
    param_keys, JobRequest, JobScheduleParam, JobState, ParamValue, ScheduleRequest,
    SchedulerStatus, Session, SimpleTriggerSpec, BLOCKOUT_ACTION, SCHEDULABLE_KEY,
};
use common::repository::{InMemoryRepository, StaticPdiContentProvider};
use common::BlockoutUpdate;
use std::collections::HashMap;

const REPORT: &str = "/public/sales/report.prpt";
const ARCHIVE: &str = "/public/sales/archive.prpt";
const TRANSFORMATION: &str = "/public/etl/load_orders.ktr";

fn admin() -> Session {
    Session::new("admin", &["Administrator"])
}

fn author(name: &str) -> Session {
    Session::new(name, &["Power User"])
}

fn guest() -> Session {
    Session::new("guest", &[])
}

/// Runtime with default settings, three repository files and UTC as default zone
fn setup_runtime() -> InMemoryRuntime {
    let mut settings = Settings::default();
    settings.scheduler.default_timezone = "UTC".to_string();

    let repository = InMemoryRepository::new()
        .with_file(REPORT, HashMap::new())
        .with_file(
            ARCHIVE,
            HashMap::from([(SCHEDULABLE_KEY.to_string(), "false".to_string())]),
        )
        .with_file(TRANSFORMATION, HashMap::new());
    let pdi_content =
        StaticPdiContentProvider::new().with_parameters(TRANSFORMATION, ["region", "batch"]);

    init_in_memory_runtime(&settings, repository, pdi_content)
        .expect("Failed to initialize runtime")
}

fn simple_request(
    input_file: &str,
    start: (u32, u32),
    repeat_count: i32,
    interval_seconds: i64,
) -> ScheduleRequest {
    ScheduleRequest {
        input_file: input_file.to_string(),
        time_zone: Some("UTC".to_string()),
        simple_job_trigger: Some(SimpleTriggerSpec {
            start_time: NaiveDate::from_ymd_opt(2030, 1, 1)
                .unwrap()
                .and_hms_opt(start.0, start.1, 0)
                .unwrap(),
            end_time: None,
            repeat_count,
            repeat_interval_seconds: interval_seconds,
        }),
        ..ScheduleRequest::default()
    }
}

/// Daily one-hour blockout starting at 10:00 UTC
fn morning_blockout() -> ScheduleRequest {
    ScheduleRequest {
        job_name: "morning-maintenance".to_string(),
        duration: Some(3600),
        ..simple_request("", (10, 0), -1, 86_400)
    }
}

#[tokio::test]
async fn test_create_job_derives_name_and_output_path() {
    let runtime = setup_runtime();
    let alice = author("alice");

    let job = runtime
        .orchestrator
        .create_job(&alice, simple_request(REPORT, (9, 0), -1, 3600))
        .await
        .expect("Failed to create job");

    assert_eq!(job.job_name, "report");
    assert_eq!(job.user_name, "alice");
    assert_eq!(job.state, JobState::Normal);
    assert!(job.job_id.starts_with("alice\treport\t"));
    assert_eq!(
        job.job_params.get(param_keys::INPUT_FILE),
        Some(&ParamValue::Text(REPORT.to_string()))
    );
    assert_eq!(
        job.job_params.get(param_keys::OUTPUT_FILE),
        Some(&ParamValue::Text("/home/alice/report.*".to_string()))
    );

    let stored = runtime.orchestrator.get_job(&job.job_id).await.unwrap();
    assert_eq!(stored, Some(job));
}

#[tokio::test]
async fn test_create_job_rejects_unschedulable_and_missing_files() {
    let runtime = setup_runtime();
    let alice = author("alice");

    let locked = runtime
        .orchestrator
        .create_job(&alice, simple_request(ARCHIVE, (9, 0), -1, 3600))
        .await;
    assert!(matches!(locked, Err(ServiceError::NotSchedulable(_))));

    let missing = runtime
        .orchestrator
        .create_job(&alice, simple_request("/public/missing.prpt", (9, 0), -1, 3600))
        .await;
    assert!(matches!(missing, Err(ServiceError::InputFileNotFound(_))));

    let denied = runtime
        .orchestrator
        .create_job(&guest(), simple_request(REPORT, (9, 0), -1, 3600))
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied(_))));

    assert!(runtime.orchestrator.get_jobs(&admin()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transformation_parameters_are_nested() {
    let runtime = setup_runtime();
    let mut request = simple_request(TRANSFORMATION, (1, 0), -1, 86_400);
    request.job_parameters = vec![
        JobScheduleParam::new("region", "APAC"),
        JobScheduleParam::new("batch", 7i64),
    ];
    request.pdi_parameters.insert("region".to_string(), "EMEA".to_string());
    request.log_level = Some("Detailed".to_string());

    let job = runtime
        .orchestrator
        .create_job(&author("alice"), request)
        .await
        .expect("Failed to create transformation job");

    let Some(ParamValue::Map(nested)) = job.job_params.get(param_keys::PDI_PARAMETERS) else {
        panic!("expected nested transformation parameters");
    };
    assert_eq!(nested.get("region"), Some(&"EMEA".to_string()));
    assert_eq!(nested.get("batch"), Some(&"7".to_string()));
    assert_eq!(
        job.job_params.get(param_keys::LOG_LEVEL),
        Some(&ParamValue::Text("Detailed".to_string()))
    );
}

#[tokio::test]
async fn test_block_status_against_morning_blockout() {
    let runtime = setup_runtime();
    let orchestrator = &runtime.orchestrator;

    let blockout = orchestrator
        .add_blockout(&admin(), morning_blockout())
        .await
        .expect("Failed to add blockout");
    assert_eq!(blockout.action, BLOCKOUT_ACTION);
    assert_eq!(
        blockout.job_params.get(param_keys::DURATION),
        Some(&ParamValue::Number(3600))
    );
    assert!(orchestrator.has_blockouts().await.unwrap());

    // Hourly from 10:00: the 10:00 firing is blocked, 11:00 is not
    let hourly = orchestrator
        .get_block_status(&simple_request(REPORT, (10, 0), -1, 3600))
        .await
        .unwrap();
    assert!(hourly.partially_blocked);
    assert!(!hourly.totally_blocked);

    // A single run at 10:30 never fires
    let single = orchestrator
        .get_block_status(&simple_request(REPORT, (10, 30), 0, 0))
        .await
        .unwrap();
    assert!(single.partially_blocked);
    assert!(single.totally_blocked);

    // A single run at 11:00 sits on the exclusive end of the window
    let after = orchestrator
        .get_block_status(&simple_request(REPORT, (11, 0), 0, 0))
        .await
        .unwrap();
    assert!(!after.partially_blocked);
    assert!(!after.totally_blocked);

    // Blockouts never appear among regular jobs
    assert!(orchestrator.get_jobs(&admin()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blockout_requires_admin_and_positive_duration() {
    let runtime = setup_runtime();

    let denied = runtime
        .orchestrator
        .add_blockout(&author("alice"), morning_blockout())
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied(_))));

    let mut zero = morning_blockout();
    zero.duration = Some(0);
    let invalid = runtime.orchestrator.add_blockout(&admin(), zero).await;
    assert!(matches!(invalid, Err(ServiceError::InvalidRequest(_))));

    assert!(!runtime.orchestrator.has_blockouts().await.unwrap());
}

#[tokio::test]
async fn test_update_blockout_replaces_window() {
    let runtime = setup_runtime();
    let orchestrator = &runtime.orchestrator;
    let original = orchestrator
        .add_blockout(&admin(), morning_blockout())
        .await
        .unwrap();

    let mut moved = morning_blockout();
    moved.simple_job_trigger = simple_request("", (14, 0), -1, 86_400).simple_job_trigger;

    let update = orchestrator
        .update_blockout(&admin(), &original.job_id, moved)
        .await
        .unwrap();
    let replacement = match update {
        BlockoutUpdate::Updated(job) => job,
        other => panic!("unexpected update outcome: {other:?}"),
    };

    assert_ne!(replacement.job_id, original.job_id);
    assert!(orchestrator.get_job(&original.job_id).await.unwrap().is_none());

    let blockouts = orchestrator.get_block_out_jobs().await.unwrap();
    assert_eq!(blockouts.len(), 1);
    assert_eq!(blockouts[0].job_id, replacement.job_id);

    let at_ten = orchestrator
        .get_block_status(&simple_request(REPORT, (10, 30), 0, 0))
        .await
        .unwrap();
    assert!(!at_ten.partially_blocked);
}

#[tokio::test]
async fn test_update_blockout_reports_lost_window() {
    let runtime = setup_runtime();
    let orchestrator = &runtime.orchestrator;
    let original = orchestrator
        .add_blockout(&admin(), morning_blockout())
        .await
        .unwrap();

    let mut broken = morning_blockout();
    broken.duration = None;

    let update = orchestrator
        .update_blockout(&admin(), &original.job_id, broken)
        .await
        .unwrap();
    match update {
        BlockoutUpdate::RemovedButRecreateFailed {
            removed_job_id,
            cause,
        } => {
            assert_eq!(removed_job_id, original.job_id);
            assert!(matches!(cause, ServiceError::InvalidRequest(_)));
        }
        other => panic!("unexpected update outcome: {other:?}"),
    }
    assert!(!orchestrator.has_blockouts().await.unwrap());

    let unknown = orchestrator
        .update_blockout(&admin(), "no-such-blockout", morning_blockout())
        .await;
    assert!(matches!(unknown, Err(ServiceError::AccessDenied(_))));
}

#[tokio::test]
async fn test_job_lifecycle_respects_permissions() {
    let runtime = setup_runtime();
    let orchestrator = &runtime.orchestrator;
    let alice = author("alice");
    let bob = author("bob");

    let job = orchestrator
        .create_job(&alice, simple_request(REPORT, (9, 0), -1, 3600))
        .await
        .unwrap();

    let foreign_pause = orchestrator.pause_job(&guest(), &job.job_id).await;
    assert!(matches!(foreign_pause, Err(ServiceError::AccessDenied(_))));

    assert_eq!(
        orchestrator.pause_job(&alice, &job.job_id).await.unwrap(),
        JobState::Paused
    );
    // Schedule permission is enough to control someone else's job
    assert_eq!(
        orchestrator.resume_job(&bob, &job.job_id).await.unwrap(),
        JobState::Normal
    );
    assert_eq!(
        orchestrator.pause_job(&bob, &job.job_id).await.unwrap(),
        JobState::Paused
    );
    assert_eq!(
        orchestrator.resume_job(&admin(), &job.job_id).await.unwrap(),
        JobState::Normal
    );

    let fired = orchestrator.trigger_now(&bob, &job.job_id).await.unwrap();
    assert!(fired.last_run.is_some());

    let state = orchestrator
        .get_job_state(&bob, &JobRequest::new(job.job_id.clone()))
        .await
        .unwrap();
    assert_eq!(state, JobState::Normal);
    let hidden = orchestrator
        .get_job_state(&guest(), &JobRequest::new(job.job_id.clone()))
        .await;
    assert!(matches!(hidden, Err(ServiceError::UnauthorizedOperation(_))));

    assert!(orchestrator.remove_job(&alice, &job.job_id).await.unwrap());
    assert!(!orchestrator.remove_job(&alice, &job.job_id).await.unwrap());
}

#[tokio::test]
async fn test_job_info_flattens_list_parameters() {
    let runtime = setup_runtime();
    let mut request = simple_request(REPORT, (9, 0), -1, 3600);
    request.job_parameters = vec![
        JobScheduleParam::new("regions", vec!["APAC".to_string(), "EMEA".to_string()]),
        JobScheduleParam::new("empty", Vec::<String>::new()),
    ];

    let job = runtime
        .orchestrator
        .create_job(&author("alice"), request)
        .await
        .unwrap();
    let info = runtime
        .orchestrator
        .get_job_info(&author("alice"), &job.job_id)
        .await
        .unwrap();

    assert_eq!(
        info.job_params.get("regions"),
        Some(&ParamValue::Text("APAC".to_string()))
    );
    assert_eq!(
        info.job_params.get("empty"),
        Some(&ParamValue::Text(String::new()))
    );
}

#[tokio::test]
async fn test_generated_content_follows_lineage() {
    let runtime = setup_runtime();
    let alice = author("alice");
    let job = runtime
        .orchestrator
        .create_job(&alice, simple_request(REPORT, (9, 0), -1, 3600))
        .await
        .unwrap();
    let Some(ParamValue::Text(lineage_id)) = job.job_params.get(param_keys::LINEAGE_ID).cloned()
    else {
        panic!("job carries no lineage id");
    };

    let stamped = HashMap::from([(param_keys::LINEAGE_ID.to_string(), lineage_id.clone())]);
    runtime.repository.put_file("/home/alice/report.pdf", stamped.clone()).await;
    runtime.repository.put_file("/home/bob/report.pdf", stamped).await;

    let content = runtime
        .orchestrator
        .get_generated_content_for_schedule(&alice, &lineage_id)
        .await
        .unwrap();
    assert_eq!(content.len(), 1);
    assert_eq!(content[0].path, "/home/alice/report.pdf");
}

#[tokio::test]
async fn test_job_listing_is_scoped_to_caller() {
    let runtime = setup_runtime();
    let orchestrator = &runtime.orchestrator;

    for owner in ["alice", "alice", "bob"] {
        orchestrator
            .create_job(&author(owner), simple_request(REPORT, (9, 0), -1, 3600))
            .await
            .unwrap();
    }

    assert_eq!(orchestrator.get_jobs(&author("alice")).await.unwrap().len(), 2);
    assert_eq!(orchestrator.get_jobs(&author("bob")).await.unwrap().len(), 1);
    assert_eq!(orchestrator.get_jobs(&admin()).await.unwrap().len(), 3);
    assert!(orchestrator.get_jobs(&guest()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_job_creation() {
    let runtime = setup_runtime();
    let orchestrator = &runtime.orchestrator;
    let sessions: Vec<Session> = (0..20).map(|i| author(&format!("user{i}"))).collect();

    let results = futures::future::join_all(sessions.iter().map(|session| {
        orchestrator.create_job(session, simple_request(REPORT, (9, 0), -1, 3600))
    }))
    .await;

    let mut ids: Vec<String> = results
        .into_iter()
        .map(|r| r.expect("Failed to create job").job_id)
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert_eq!(orchestrator.get_jobs(&admin()).await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_engine_control_requires_schedule_permission() {
    let runtime = setup_runtime();
    let orchestrator = &runtime.orchestrator;

    assert_eq!(orchestrator.get_state().await.unwrap(), SchedulerStatus::Running);

    // Callers without permission get the status back unchanged
    assert_eq!(orchestrator.pause(&guest()).await.unwrap(), SchedulerStatus::Running);
    assert_eq!(orchestrator.pause(&admin()).await.unwrap(), SchedulerStatus::Paused);
    assert_eq!(orchestrator.start(&author("alice")).await.unwrap(), SchedulerStatus::Running);
    assert_eq!(orchestrator.shutdown(&admin()).await.unwrap(), SchedulerStatus::Stopped);

    let rejected = orchestrator
        .create_job(&admin(), simple_request(REPORT, (9, 0), -1, 3600))
        .await;
    assert!(matches!(rejected, Err(ServiceError::Engine(_))));
}

#[tokio::test]
async fn test_error_payload_serializes_code() {
    let runtime = setup_runtime();
    let err = runtime
        .orchestrator
        .create_job(&guest(), simple_request(REPORT, (9, 0), -1, 3600))
        .await
        .unwrap_err();

    let payload = serde_json::to_value(common::errors::ApiError::from(err)).unwrap();
    assert_eq!(payload["code"], "ACCESS_DENIED");
}
