//! End-to-end pipeline runs over scripted model replies.

use std::sync::Arc;

use orchestrator::agents::builder::REPORT_MARKDOWN;
use orchestrator::core::event::Event;
use orchestrator::core::types::{
    ESCALATION_CHECKER_AUTHOR, StageKind, USER_AUTHOR, VERIFICATION_LOOP_AUTHOR,
    VERIFICATION_OUTCOME_KEY,
};
use orchestrator::io::prompt::unavailable_marker;
use orchestrator::looping::LoopStop;
use orchestrator::session::{SessionHandle, SessionStore, replay};
use orchestrator::test_support::{
    RecordingArtifacts, ScriptedInvoker, text_message, threat_model_pipeline,
};

const PASS: &str = r#"{"status": "pass", "feedback": "complete"}"#;
const FAIL: &str = r#"{"status": "fail", "feedback": "missing mitigations"}"#;

async fn session() -> SessionHandle {
    SessionStore::new()
        .create("threat_model_orchestrator", "tester")
        .await
}

fn authors(events: &[Event]) -> Vec<&str> {
    events.iter().map(|e| e.author.as_str()).collect()
}

#[tokio::test]
async fn always_failing_verdicts_stop_at_cap() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .reply(StageKind::Verify, FAIL)
            .reply(StageKind::Verify, FAIL)
            .reply(StageKind::Verify, FAIL)
            .reply(StageKind::Verify, PASS),
    );
    let pipeline = threat_model_pipeline(invoker.clone(), Arc::new(RecordingArtifacts::new()), 3);
    let session = session().await;

    let outcome = pipeline
        .run(&session, text_message("three-tier web app"), None)
        .await
        .expect("run");

    let refinement = outcome.refinement.expect("loop outcome");
    assert_eq!(refinement.stop, LoopStop::CapReached { max_iterations: 3 });
    assert_eq!(refinement.iterations, 3);
    assert!(!outcome.certified());
    assert_eq!(invoker.calls_for(StageKind::Verify).len(), 3);
    // Build ran once: the loop never regenerates the report.
    assert_eq!(invoker.calls_for(StageKind::Build).len(), 1);

    let state = session.state().await;
    assert_eq!(state.text(VERIFICATION_OUTCOME_KEY), Some("best_effort"));
}

#[tokio::test]
async fn pass_on_second_iteration_certifies() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .reply(StageKind::Verify, FAIL)
            .reply(StageKind::Verify, PASS),
    );
    let pipeline = threat_model_pipeline(invoker.clone(), Arc::new(RecordingArtifacts::new()), 3);
    let session = session().await;

    let outcome = pipeline
        .run(&session, text_message("three-tier web app"), None)
        .await
        .expect("run");

    assert!(outcome.certified());
    assert_eq!(invoker.calls_for(StageKind::Verify).len(), 2);
    let events = session.events().await;
    assert_eq!(
        authors(&events),
        vec![
            USER_AUTHOR,
            StageKind::Parse.author(),
            StageKind::Analyze.author(),
            StageKind::Build.author(),
            StageKind::Verify.author(),
            ESCALATION_CHECKER_AUTHOR,
            StageKind::Verify.author(),
            ESCALATION_CHECKER_AUTHOR,
            VERIFICATION_LOOP_AUTHOR,
        ]
    );
    assert!(!events[5].actions.escalate);
    assert!(events[7].actions.escalate);
    assert_eq!(
        session.state().await.text(VERIFICATION_OUTCOME_KEY),
        Some("certified")
    );
}

#[tokio::test]
async fn build_failure_still_runs_the_loop() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .fail(StageKind::Build, "model unavailable")
            .reply(StageKind::Verify, FAIL),
    );
    let artifacts = Arc::new(RecordingArtifacts::new());
    let pipeline = threat_model_pipeline(invoker.clone(), artifacts.clone(), 1);
    let session = session().await;

    let outcome = pipeline
        .run(&session, text_message("serverless app"), None)
        .await
        .expect("run");

    assert_eq!(
        outcome.refinement.map(|r| r.stop),
        Some(LoopStop::CapReached { max_iterations: 1 })
    );
    let events = session.events().await;
    let build = events
        .iter()
        .find(|e| e.author == StageKind::Build.author())
        .expect("build event");
    assert_eq!(build.error.as_deref(), Some("model unavailable"));

    let state = session.state().await;
    assert!(!state.contains(StageKind::Build.output_key()));
    assert!(artifacts.written().is_empty());

    let verify_prompt = &invoker.calls_for(StageKind::Verify)[0].prompt;
    assert!(verify_prompt.contains(&unavailable_marker(StageKind::Build.output_key())));
}

#[tokio::test]
async fn stage_outputs_flow_into_later_prompts() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .reply(StageKind::Parse, "COMPONENTS: api, db")
            .reply(StageKind::Analyze, "THREAT: sql injection")
            .reply(StageKind::Build, "# REPORT BODY")
            .reply(StageKind::Verify, PASS),
    );
    let artifacts = Arc::new(RecordingArtifacts::new());
    let pipeline = threat_model_pipeline(invoker.clone(), artifacts.clone(), 3);
    let session = session().await;

    pipeline
        .run(&session, text_message("api and db"), None)
        .await
        .expect("run");

    assert!(invoker.calls_for(StageKind::Analyze)[0].prompt.contains("COMPONENTS: api, db"));
    let build_prompt = &invoker.calls_for(StageKind::Build)[0].prompt;
    assert!(build_prompt.contains("THREAT: sql injection"));
    assert!(build_prompt.contains("COMPONENTS: api, db"));
    assert!(invoker.calls_for(StageKind::Verify)[0].prompt.contains("# REPORT BODY"));
    assert_eq!(artifacts.written(), vec!["# REPORT BODY".to_string()]);

    let events = session.events().await;
    let build = events
        .iter()
        .find(|e| e.author == StageKind::Build.author())
        .expect("build event");
    assert!(build.actions.artifact_delta[REPORT_MARKDOWN].is_success());
}

#[tokio::test]
async fn ordinals_strictly_increase_and_log_replays_to_state() {
    let invoker = Arc::new(ScriptedInvoker::new().reply(StageKind::Verify, PASS));
    let pipeline = threat_model_pipeline(invoker, Arc::new(RecordingArtifacts::new()), 3);
    let session = session().await;

    let first = pipeline
        .run(&session, text_message("first"), None)
        .await
        .expect("first run");
    let second = pipeline
        .run(&session, text_message("second"), None)
        .await
        .expect("second run");
    assert_ne!(first.invocation_id, second.invocation_id);

    let snapshot = session.snapshot().await;
    for (idx, event) in snapshot.events.iter().enumerate() {
        assert_eq!(event.ordinal, idx as u64);
    }
    assert!(
        snapshot
            .events
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    );
    assert_eq!(replay(&snapshot.events), snapshot.state);

    // A finished log reads back identically.
    assert_eq!(session.events().await, snapshot.events);
}

#[tokio::test]
async fn concurrent_runs_on_one_session_do_not_interleave() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let pipeline = Arc::new(threat_model_pipeline(
        invoker,
        Arc::new(RecordingArtifacts::new()),
        1,
    ));
    let session = session().await;

    let a = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let session = session.clone();
        async move { pipeline.run(&session, text_message("a"), None).await }
    });
    let b = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let session = session.clone();
        async move { pipeline.run(&session, text_message("b"), None).await }
    });
    a.await.expect("join a").expect("run a");
    b.await.expect("join b").expect("run b");

    let events = session.events().await;
    let ids: Vec<&str> = events.iter().map(|e| e.invocation_id.as_str()).collect();
    let half = ids.len() / 2;
    assert!(ids[..half].iter().all(|id| *id == ids[0]));
    assert!(ids[half..].iter().all(|id| *id == ids[half]));
    assert_ne!(ids[0], ids[half]);
}

#[tokio::test]
async fn failed_verify_on_reused_session_is_not_certified() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .reply(StageKind::Verify, PASS)
            .fail(StageKind::Verify, "verifier down"),
    );
    let pipeline = threat_model_pipeline(invoker.clone(), Arc::new(RecordingArtifacts::new()), 1);
    let session = session().await;

    let first = pipeline
        .run(&session, text_message("first"), None)
        .await
        .expect("first run");
    assert!(first.certified());

    let second = pipeline
        .run(&session, text_message("second"), None)
        .await
        .expect("second run");
    assert!(!second.certified());
    assert_eq!(invoker.calls_for(StageKind::Verify).len(), 2);
    assert_eq!(
        session.state().await.text(VERIFICATION_OUTCOME_KEY),
        Some("best_effort")
    );
}

#[tokio::test]
async fn every_model_call_carries_the_run_invocation_id() {
    let invoker = Arc::new(ScriptedInvoker::new().reply(StageKind::Verify, PASS));
    let pipeline = threat_model_pipeline(invoker.clone(), Arc::new(RecordingArtifacts::new()), 3);
    let session = session().await;

    let first = pipeline
        .run(&session, text_message("first"), None)
        .await
        .expect("first run");
    let first_calls = invoker.calls().len();
    assert!(first_calls >= 4);

    let second = pipeline
        .run(&session, text_message("second"), None)
        .await
        .expect("second run");
    assert_ne!(first.invocation_id, second.invocation_id);

    let calls = invoker.calls();
    assert!(calls[..first_calls]
        .iter()
        .all(|call| call.invocation_id == first.invocation_id));
    assert!(calls[first_calls..]
        .iter()
        .all(|call| call.invocation_id == second.invocation_id));
}
