use gradebox::{
    FileProgressSink, GradeError, Grader, Progress, ProgressError, TestcaseError,
    TracingProgressSink, Verdict,
};

use super::{FakeJudge, Workspace, fixture};

fn verdicts(results: &[gradebox::TestcaseResult]) -> Vec<Verdict> {
    results.iter().map(|r| r.verdict).collect()
}

#[tokio::test]
async fn identical_output_is_accepted() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("single-ac", "single", "sum");

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    let results = grader.grade_all().await.unwrap();

    assert_eq!(verdicts(&results), vec![Verdict::Accepted]);
    assert_eq!(results[0].id.as_deref(), Some("1"));
    assert_eq!(
        std::fs::read(ws.work_dir.join("1.txt")).unwrap(),
        std::fs::read(fixture("problems/single/1/out.txt")).unwrap()
    );
}

#[tokio::test]
async fn compile_failure_is_single_record() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let sink = FileProgressSink::new(&ws.config.progress_dir);
    let job = ws.job("sum-ce", "sum", "broken source");

    let mut grader = Grader::new(ws.config.clone(), &judge, &sink, job)
        .await
        .unwrap();
    assert!(grader.artifact().is_none());
    assert!(grader.diagnostics().unwrap().contains("error: expected ';'"));

    let results = grader.grade_all().await.unwrap();
    assert_eq!(verdicts(&results), vec![Verdict::CompilationError]);
    assert_eq!(results[0].id, None);
    assert_eq!(grader.job().progress(), Progress::new(0, 0));

    // No test case ran and nothing was published
    assert_eq!(judge.requests().len(), 1);
    assert!(matches!(
        sink.read("sum-ce").await,
        Err(ProgressError::NotFound(_))
    ));
    assert!(!ws.work_dir.join("compiler.out").exists());
}

#[tokio::test]
async fn time_limit_beats_correct_output() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("sum-tle", "sum", "spin");

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    let results = grader.grade_all().await.unwrap();

    assert_eq!(verdicts(&results), vec![Verdict::TimeLimitExceeded; 3]);
    let telemetry = results[0].telemetry.as_ref().unwrap();
    assert!(telemetry.cpu_time > 1.0);
}

#[tokio::test]
async fn trailing_whitespace_is_accepted() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("sum-padded", "sum", "sum-padded");

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    let results = grader.grade_all().await.unwrap();

    assert_eq!(verdicts(&results), vec![Verdict::Accepted; 3]);
}

#[tokio::test]
async fn missing_output_is_wrong_answer() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("sum-silent", "sum", "silent");

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    let results = grader.grade_all().await.unwrap();

    assert_eq!(verdicts(&results), vec![Verdict::WrongAnswer; 3]);
    assert!(!ws.work_dir.join("1.txt").exists());
}

#[tokio::test]
async fn wrong_output_is_wrong_answer() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("sum-wa", "sum", "sum-wrong");

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    let results = grader.grade_all().await.unwrap();

    assert_eq!(verdicts(&results), vec![Verdict::WrongAnswer; 3]);
}

#[tokio::test]
async fn failures_beat_output_comparison() {
    for (program, verdict) in [
        ("hog", Verdict::MemoryLimitExceeded),
        ("crash", Verdict::RuntimeError),
    ] {
        let ws = Workspace::new();
        let judge = FakeJudge::new(&ws.config);
        let job = ws.job(program, "single", program);

        let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
            .await
            .unwrap();
        let results = grader.grade_all().await.unwrap();
        assert_eq!(verdicts(&results), vec![verdict], "program {program}");
    }
}

#[tokio::test]
async fn every_case_is_graded_in_order() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("sum-order", "sum", "sum");

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    let results = grader.grade_all().await.unwrap();

    let ids: Vec<_> = results.iter().filter_map(|r| r.id.as_deref()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(verdicts(&results), vec![Verdict::Accepted; 3]);

    let progress = grader.job().progress();
    assert_eq!(progress, Progress::new(3, 3));
    assert!(progress.is_finished());
    assert_eq!(grader.job().results(), results.as_slice());
}

#[tokio::test]
async fn runs_use_job_limits_and_runner_identity() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws
        .job("sum-limits", "sum", "sum")
        .time_limit(0.5)
        .memory_limit(131072);

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    grader.grade_all().await.unwrap();

    let requests = judge.requests();
    assert_eq!(requests.len(), 4);

    let compile = &requests[0];
    assert_eq!(compile.identity, Some(ws.config.compiler_identity()));
    assert_eq!(compile.seccomp_profile, None);
    assert_eq!(compile.limits.time_limit, 3.0);
    assert_eq!(compile.limits.max_output, 512 * 1024);

    let work_dir = std::fs::canonicalize(&ws.work_dir).unwrap();
    for (run, case) in requests[1..].iter().zip(["1", "2", "3"]) {
        assert_eq!(run.identity, Some(ws.config.runner_identity()));
        assert_eq!(run.seccomp_profile.as_deref(), Some("c_cpp"));
        assert_eq!(run.limits.time_limit, 0.5);
        assert_eq!(run.limits.wall_time_limit, 1.0);
        assert_eq!(run.limits.memory_limit, 131072);
        assert_eq!(run.program, work_dir.join("main").to_str().unwrap());
        assert_eq!(run.stdout, Some(work_dir.join(format!("{case}.txt"))));
        assert_eq!(
            run.stdin,
            Some(fixture("problems/sum").join(case).join("in.txt"))
        );
    }
}

#[tokio::test]
async fn artifact_is_locked_down() {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("sum-lock", "single", "sum");

    let grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    let artifact = grader.artifact().unwrap();

    let meta = std::fs::metadata(artifact).unwrap();
    assert_eq!(meta.permissions().mode() & 0o777, 0o500);
    assert_eq!(meta.uid(), ws.config.runner_identity().uid);
    assert_eq!(meta.gid(), ws.config.runner_identity().gid);
}

#[tokio::test]
async fn progress_file_tracks_grading() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let sink = FileProgressSink::new(&ws.config.progress_dir);
    let job = ws.job("sum-progress", "sum", "sum");

    let mut grader = Grader::new(ws.config.clone(), &judge, &sink, job)
        .await
        .unwrap();
    grader.grade_all().await.unwrap();

    assert_eq!(sink.read("sum-progress").await.unwrap(), Progress::new(3, 3));

    let path = ws.dir.path().join("progress/sum-progress.json");
    let raw = std::fs::read(path).unwrap();
    let document: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(document["job_id"], "sum-progress");
    assert_eq!(document["completed"], 3);
    assert_eq!(document["total"], 3);
    assert_eq!(document["progress"], "3/3");
}

#[tokio::test]
async fn unknown_problem_fails_grading() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("nope", "no-such-problem", "sum");

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    assert!(matches!(
        grader.grade_all().await,
        Err(GradeError::Testcases(TestcaseError::ProblemNotFound(_)))
    ));
}

#[tokio::test]
async fn path_traversal_problem_is_rejected() {
    let ws = Workspace::new();
    let judge = FakeJudge::new(&ws.config);
    let job = ws.job("escape", "../configs", "sum");

    let mut grader = Grader::new(ws.config.clone(), &judge, TracingProgressSink, job)
        .await
        .unwrap();
    assert!(matches!(
        grader.grade_all().await,
        Err(GradeError::Testcases(TestcaseError::InvalidProblemId(_)))
    ));
}
