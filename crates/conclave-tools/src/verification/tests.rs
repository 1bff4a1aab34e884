use super::*;
use crate::error::Error;
use crate::runner::{MockCommandRunner, ProcessRunner};
use chrono::Utc;

fn output(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(exit_code),
        signal: None,
        stdout: stdout.to_string(),
        stderr: String::new(),
        started_at: Utc::now(),
        duration_ms: 3,
        timed_out: false,
        stdout_truncated: false,
        stderr_truncated: false,
    }
}

fn verifier(runner: MockCommandRunner, config: VerificationConfig) -> Verifier {
    Verifier::new(Arc::new(runner), config)
}

#[test]
fn test_exit_code_mismatch_fails() {
    let result = evaluate(&VerificationCommand::new("false"), &output(1, ""));
    assert!(!result.ok);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.notes, vec!["expected exit code 0, got 1".to_string()]);
}

#[test]
fn test_output_assertions() {
    let command = VerificationCommand::new("cargo")
        .expect_contains("test result: ok")
        .expect_not_contains("FAILED")
        .expect_regex(r"\d+ passed");

    let good = evaluate(&command, &output(0, "test result: ok. 12 passed"));
    assert!(good.ok, "notes: {:?}", good.notes);

    let bad = evaluate(&command, &output(0, "test result: FAILED"));
    assert!(!bad.ok);
    assert_eq!(bad.notes.len(), 3);
}

#[test]
fn test_invalid_regex_becomes_note() {
    let command = VerificationCommand::new("echo").expect_regex("([unclosed");
    let result = evaluate(&command, &output(0, "anything"));
    assert!(result.ok);
    assert_eq!(result.notes.len(), 1);
    assert!(result.notes[0].starts_with("skipped invalid regex"));
}

#[test]
fn test_timeout_fails_even_with_matching_code() {
    let mut out = output(0, "");
    out.timed_out = true;
    out.exit_code = None;
    out.signal = Some(9);
    let result = evaluate(&VerificationCommand::new("sleep"), &out);
    assert!(!result.ok);
    assert!(result.timed_out);
    assert!(result.notes[0].starts_with("timed out"));
}

#[test]
fn test_deserialize_camel_case_aliases() {
    let command: VerificationCommand = serde_json::from_str(
        r#"{"cmd": "npm", "args": ["test"], "expectExitCode": 0, "expectOutputContains": "ok", "timeoutMs": 500}"#,
    )
    .unwrap();
    assert_eq!(command.expect_exit_code, Some(0));
    assert_eq!(command.expect_output_contains.as_deref(), Some("ok"));
    assert_eq!(command.timeout_ms, Some(500));
}

#[tokio::test]
async fn test_runner_errors_are_isolated_and_order_preserved() {
    let mut runner = MockCommandRunner::new();
    runner.expect_run().times(3).returning(|spec, _| match spec.cmd.as_str() {
        "missing" => Err(Error::NotFound("executable 'missing' not found".to_string())),
        "fail" => Ok(output(2, "")),
        _ => Ok(output(0, "fine")),
    });

    let commands = vec![
        VerificationCommand::new("ok"),
        VerificationCommand::new("missing"),
        VerificationCommand::new("fail"),
    ];
    let results = verifier(runner, VerificationConfig::default())
        .run(&commands, &CancellationToken::new())
        .await
        .unwrap();

    let summary: Vec<(&str, bool)> = results.iter().map(|r| (r.command.as_str(), r.ok)).collect();
    assert_eq!(
        summary,
        vec![("ok", true), ("missing", false), ("fail", false)]
    );
    assert!(results[1].notes[0].contains("not found"));
}

#[tokio::test]
async fn test_timeout_and_allowlist_are_passed_to_runner() {
    let mut runner = MockCommandRunner::new();
    runner
        .expect_run()
        .withf(|spec, _| {
            spec.timeout_ms == Some(250) && spec.allowlist == Some(vec!["make".to_string()])
        })
        .times(1)
        .returning(|_, _| Ok(output(0, "")));

    let config = VerificationConfig {
        allowlist: Some(vec!["make".to_string()]),
        default_timeout_ms: 250,
        ..Default::default()
    };
    let results = verifier(runner, config)
        .run(&[VerificationCommand::new("make")], &CancellationToken::new())
        .await
        .unwrap();
    assert!(results[0].ok);
}

#[tokio::test]
async fn test_disabled_flags_never_spawn() {
    for (enabled, allow_exec, note) in [
        (false, true, "verification is disabled"),
        (true, false, "command execution is not allowed"),
    ] {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();
        let config = VerificationConfig {
            enabled,
            allow_exec,
            ..Default::default()
        };
        let commands = vec![VerificationCommand::new("a"), VerificationCommand::new("b")];
        let results = verifier(runner, config)
            .run(&commands, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.ok && r.skipped && !r.is_failure()));
        assert_eq!(results[0].notes, vec![note.to_string()]);
        assert!(format_report(&results).starts_with("Verification: 0/0 passed (2 skipped)"));
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let mut runner = MockCommandRunner::new();
    runner.expect_run().never();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = verifier(runner, VerificationConfig::default())
        .run(&[VerificationCommand::new("true")], &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn test_format_report() {
    let results = vec![
        evaluate(&VerificationCommand::new("true"), &output(0, "")),
        evaluate(&VerificationCommand::new("false"), &output(1, "")),
    ];
    let report = format_report(&results);
    assert!(report.starts_with("Verification: 1/2 passed"));
    assert!(report.contains("❌ `false` (exit 1)"));
    assert!(report.contains("expected exit code 0, got 1"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_false_with_expected_zero_is_not_ok() {
    let verifier = Verifier::new(Arc::new(ProcessRunner::new()), VerificationConfig::default());
    let results = verifier
        .run(
            &[VerificationCommand::new("false").expect_exit_code(0)],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(!results[0].ok);
    assert_eq!(results[0].exit_code, Some(1));
}

#[cfg(unix)]
#[tokio::test]
async fn test_disallowed_executable_never_spawns() {
    let config = VerificationConfig {
        allowlist: Some(vec!["echo".to_string()]),
        ..Default::default()
    };
    let verifier = Verifier::new(Arc::new(ProcessRunner::new()), config);
    let results = verifier
        .run(
            &[
                VerificationCommand::new("echo").with_args(["hi"]),
                VerificationCommand::new("true"),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(results[0].ok);
    assert!(!results[1].ok);
    assert_eq!(results[1].exit_code, None);
    assert!(results[1].notes[0].contains("allowlist"));
}
