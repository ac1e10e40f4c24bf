use std::os::unix::fs::{MetadataExt, PermissionsExt};

use gradebox::{
    Config, FileProgressSink, Grader, GradingJob, IsolateSandbox, Progress, ResourceLimits,
    Sandbox, SandboxOutcome, SandboxRequest, TracingProgressSink, Verdict, prepare_cgroup,
};

use super::{Workspace, fixture};

/// Default config running on box `box_id` and compiling on `box_id + 1`,
/// with cgroups if available
fn test_config(box_id: u32) -> Config {
    let mut config = Config::default();
    config.box_id = box_id;
    if config.cgroup {
        match prepare_cgroup(&config.cg_root) {
            Ok(true) => {}              // cgroups ready
            _ => config.cgroup = false, // not available, fall back
        }
    }
    config
}

fn workspace(box_id: u32) -> Workspace {
    let ws = Workspace::with_config(tempfile::tempdir().unwrap(), test_config(box_id));
    std::fs::set_permissions(&ws.work_dir, std::fs::Permissions::from_mode(0o777)).unwrap();
    ws
}

/// Copy a fixture source into the work directory as a C11 submission
fn job(ws: &Workspace, job_id: &str, problem_id: &str, source: &str) -> GradingJob {
    let path = ws.work_dir.join("main.c");
    std::fs::copy(fixture(&format!("sources/{source}")), &path).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
    GradingJob::new(job_id, problem_id, "c11", &ws.work_dir, path)
}

async fn grade(ws: &Workspace, job: GradingJob) -> Vec<Verdict> {
    let sandbox = IsolateSandbox::from_config(&ws.config);
    let mut grader = Grader::new(ws.config.clone(), sandbox, TracingProgressSink, job)
        .await
        .expect("Failed to set up grading");
    grader
        .grade_all()
        .await
        .expect("Grading failed")
        .into_iter()
        .map(|r| r.verdict)
        .collect()
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_run_echo() {
    let ws = workspace(50);
    let input = ws.dir.path().join("input.txt");
    std::fs::write(&input, "hello\n").unwrap();
    let output = ws.work_dir.join("out.txt");

    let request = SandboxRequest::new(vec!["cat".to_string()], &ws.work_dir)
        .unwrap()
        .env("PATH", "/usr/bin:/bin")
        .limits(ResourceLimits::new(1.0, 2.0, 65536).with_unbounded_processes())
        .stdin(&input)
        .output(&output);

    let sandbox = IsolateSandbox::from_config(&ws.config);
    let result = sandbox.execute(&request).await.expect("Execution failed");

    assert_eq!(result.outcome, SandboxOutcome::Success);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "hello\n");
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_grade_accepted() {
    let ws = workspace(52);
    let sink = FileProgressSink::new(&ws.config.progress_dir);
    let job = job(&ws, "isolate-ac", "sum", "sum.c");

    let sandbox = IsolateSandbox::from_config(&ws.config);
    let mut grader = Grader::new(ws.config.clone(), sandbox, &sink, job)
        .await
        .expect("Failed to set up grading");

    // Owned by the user of the run box, which is who isolate executes it as
    let owner = std::fs::metadata(grader.artifact().unwrap()).unwrap();
    let box_user = IsolateSandbox::from_config(&ws.config).box_user(ws.config.box_id);
    assert_eq!((owner.uid(), owner.gid()), (box_user.uid, box_user.gid));

    let results = grader.grade_all().await.expect("Grading failed");
    assert!(results.iter().all(|r| r.verdict == Verdict::Accepted));
    assert_eq!(sink.read("isolate-ac").await.unwrap(), Progress::new(3, 3));
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_grade_compilation_error() {
    let ws = workspace(54);
    let verdicts = grade(&ws, job(&ws, "isolate-ce", "sum", "compile_error.c")).await;
    assert_eq!(verdicts, vec![Verdict::CompilationError]);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_grade_time_limit() {
    let ws = workspace(56);
    let job = job(&ws, "isolate-tle", "single", "spin.c").time_limit(0.5);
    assert_eq!(grade(&ws, job).await, vec![Verdict::TimeLimitExceeded]);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_grade_trailing_whitespace() {
    let ws = workspace(58);
    let verdicts = grade(&ws, job(&ws, "isolate-ws", "sum", "sum_trailing_space.c")).await;
    assert_eq!(verdicts, vec![Verdict::Accepted; 3]);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_grade_runtime_error() {
    let ws = workspace(60);
    let verdicts = grade(&ws, job(&ws, "isolate-re", "single", "crash.c")).await;
    assert_eq!(verdicts, vec![Verdict::RuntimeError]);
}
