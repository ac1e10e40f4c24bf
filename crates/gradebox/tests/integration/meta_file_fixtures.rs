use gradebox::isolate::MetaFile;
use gradebox::types::{ExecutionStatus, LimitExceeded};
use gradebox::{ResourceLimits, SandboxOutcome};

use super::fixture;

fn load_meta_fixture(name: &str) -> MetaFile {
    let path = fixture(&format!("meta/{name}"));
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read meta fixture {}: {}", path.display(), e));
    MetaFile::parse(&content)
}

fn classify(name: &str) -> SandboxOutcome {
    load_meta_fixture(name).classify(&ResourceLimits::new(1.0, 2.0, 262144))
}

#[test]
fn test_meta_success() {
    let meta = load_meta_fixture("success.meta");
    assert_eq!(meta.status(), ExecutionStatus::Ok);
    assert_eq!(meta.exit_code(), Some(0));
    assert!((meta.time() - 0.004).abs() < 0.001);
    assert_eq!(meta.limit_exceeded(), LimitExceeded::NotExceeded);
    assert_eq!(classify("success.meta"), SandboxOutcome::Success);
}

#[test]
fn test_meta_tle() {
    let meta = load_meta_fixture("tle.meta");
    assert_eq!(meta.status(), ExecutionStatus::TimeLimitExceeded);
    assert_eq!(meta.limit_exceeded(), LimitExceeded::Time);
    assert_eq!(classify("tle.meta"), SandboxOutcome::TimeLimitExceeded);
}

#[test]
fn test_meta_wall_tle() {
    let meta = load_meta_fixture("wall_tle.meta");
    assert_eq!(meta.limit_exceeded(), LimitExceeded::WallTime);
    assert!(meta.wall_time() > 4.0);
    assert_eq!(classify("wall_tle.meta"), SandboxOutcome::TimeLimitExceeded);
}

#[test]
fn test_meta_mle() {
    let meta = load_meta_fixture("mle.meta");
    assert!(meta.oom_killed());
    assert_eq!(meta.limit_exceeded(), LimitExceeded::Memory);
    assert_eq!(classify("mle.meta"), SandboxOutcome::MemoryLimitExceeded);
}

#[test]
fn test_meta_output_limit() {
    let meta = load_meta_fixture("ole.meta");
    assert_eq!(meta.limit_exceeded(), LimitExceeded::Output);
    assert_eq!(classify("ole.meta"), SandboxOutcome::RuntimeError);
}

#[test]
fn test_meta_signal() {
    let meta = load_meta_fixture("signal.meta");
    assert_eq!(meta.status(), ExecutionStatus::Signaled);
    assert_eq!(meta.signal(), Some(11));
    assert_eq!(classify("signal.meta"), SandboxOutcome::RuntimeError);
}

#[test]
fn test_meta_runtime_error() {
    let meta = load_meta_fixture("runtime_error.meta");
    assert_eq!(meta.status(), ExecutionStatus::RuntimeError);
    assert_eq!(meta.exit_code(), Some(3));
    assert_eq!(classify("runtime_error.meta"), SandboxOutcome::RuntimeError);
}

#[test]
fn test_meta_internal_error() {
    let meta = load_meta_fixture("internal_error.meta");
    assert_eq!(meta.status(), ExecutionStatus::InternalError);
    assert_eq!(classify("internal_error.meta"), SandboxOutcome::SystemError);
}

#[test]
fn test_meta_cgroup_mem_priority() {
    let meta = load_meta_fixture("cgroup_mem.meta");
    // cg-mem should be preferred over max-rss
    assert_eq!(meta.memory(), 524288);
    assert_eq!(classify("cgroup_mem.meta"), SandboxOutcome::MemoryLimitExceeded);
}

#[test]
fn test_meta_memory_over_unenforced_limit() {
    // Ceiling handed to the runtime only; isolate reports a clean exit
    let meta = load_meta_fixture("success.meta");
    let limits = ResourceLimits::new(1.0, 2.0, 1024).with_memory_check_only(true);
    assert_eq!(meta.classify(&limits), SandboxOutcome::MemoryLimitExceeded);
}

#[tokio::test]
async fn test_meta_load_strict() {
    let meta = MetaFile::load(fixture("meta/tle.meta")).await.unwrap();
    assert_eq!(meta.message().as_deref(), Some("Time limit exceeded"));
}
