mod utils;

use std::time::{Duration, Instant};

use indoc::indoc;
use runwatch_collector::{Collector, Event, EventKind, OutputStream};
use runwatch_supervisor::{
    Error, ProcessTree, Supervisor, SupervisorConfig, SupervisorState, WorkerCommand, WorkerExit,
};
use test_log::test;

use self::utils::{Fixture, eventually, test_config, touch};

#[test(tokio::test)]
async fn missing_script() {
    let dir = tempfile::tempdir().unwrap();
    let command = WorkerCommand::new(dir.path().join("missing.py"));

    let mut supervisor = Supervisor::new(command, test_config(), Collector::new().into());

    let res = supervisor.start().await;
    assert!(matches!(res, Err(Error::ScriptNotFound(_))), "{res:?}");
    assert_eq!(supervisor.state(), SupervisorState::NotStarted);
    assert!(supervisor.pid().is_none());
}

#[test(tokio::test)]
async fn missing_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("main.py");
    std::fs::write(&script, "").unwrap();

    let command = WorkerCommand::new(&script).interpreter(dir.path().join("no-such-python"));
    let mut supervisor = Supervisor::new(command, test_config(), Collector::new().into());

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, Error::Spawn(ref path, _) if *path == script), "{err:?}");
    assert!(err.to_string().starts_with("cannot spawn "), "{err}");
    assert_eq!(supervisor.state(), SupervisorState::NotStarted);
}

#[test(tokio::test)]
async fn output_and_exit_code() {
    let mut fixture = Fixture::new(indoc! {r#"
        echo hello
        echo oops >&2
        exit 3
    "#});

    fixture.supervisor.start().await.unwrap();
    let pid = fixture.supervisor.pid().unwrap();

    assert_eq!(fixture.supervisor.wait().await, Some(WorkerExit::Code(3)));
    assert_eq!(fixture.supervisor.state(), SupervisorState::Crashed);
    assert_eq!(fixture.supervisor.exit_code(), Some(3));

    fixture.wait_for_line(OutputStream::Stdout, "hello").await;
    fixture.wait_for_line(OutputStream::Stderr, "oops").await;

    let system = fixture.lines(OutputStream::System);
    assert_eq!(system[0], format!("started process {pid}"));
    assert!(system.contains(&"process exited with code 3".to_owned()), "{system:?}");
}

#[test(tokio::test)]
async fn worker_environment() {
    let mut fixture = Fixture::new(indoc! {r#"
        pwd -P
        echo "trace=$RUNWATCH_TRACE"
        case "$RUNWATCH_TRACE_PATH" in
            *.jsonl) echo "channel ok" ;;
        esac
    "#});

    fixture.supervisor.start().await.unwrap();
    assert_eq!(fixture.supervisor.wait().await, Some(WorkerExit::Code(0)));
    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);

    fixture.wait_for_line(OutputStream::Stdout, "channel ok").await;

    let dir = std::fs::canonicalize(fixture.dir.path()).unwrap();
    let stdout = fixture.lines(OutputStream::Stdout);
    assert_eq!(stdout[0], dir.to_str().unwrap());
    assert_eq!(stdout[1], "trace=1");
}

#[test(tokio::test)]
async fn trace_records() {
    let mut fixture = Fixture::new(indoc! {r#"
        emit() { printf '%s\n' "$1" >> "$RUNWATCH_TRACE_PATH"; }

        echo "$RUNWATCH_TRACE_PATH"

        emit '{"type":"call","function_name":"main","filename":"main.py","line_no":1}'
        emit '{"type":"call","function_name":"helper","filename":"main.py","line_no":5,"args":{"x":"1"}}'
        emit 'this is not a record'
        emit '{"type":"return","function_name":"helper","return_value":"2"}'
        emit '{"type":"exception","exception_type":"ValueError","message":"bad","traceback":["main.py:7 in main"]}'
        emit '{"type":"return","function_name":"main","return_value":"None"}'
    "#});

    let collector = fixture.collector().clone();

    fixture.supervisor.start().await.unwrap();
    assert_eq!(fixture.supervisor.wait().await, Some(WorkerExit::Code(0)));

    eventually(|| collector.returns().len() == 2).await;

    let calls = collector.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].function_name, "main");
    assert_eq!(calls[0].parent_id, None);
    assert_eq!(calls[1].function_name, "helper");
    assert_eq!(calls[1].parent_id, Some(calls[0].call_id));
    assert_eq!(calls[1].args.get("x").map(String::as_str), Some("1"));

    let returns = collector.returns();
    assert_eq!(returns[0].call_id, calls[1].call_id);
    assert_eq!(returns[0].return_value, "2");
    assert_eq!(returns[1].call_id, calls[0].call_id);

    let exceptions = collector.exceptions();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].exception_type, "ValueError");
    assert_eq!(exceptions[0].frames, vec!["main.py:7 in main".to_owned()]);

    assert!(collector.call_stack().is_empty());

    // the malformed line was skipped, in order
    let mut kinds = Vec::new();
    while let Some(event) = collector.try_next_event() {
        if event.kind() != EventKind::Output {
            kinds.push(event.kind());
        }
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::Call,
            EventKind::Call,
            EventKind::Return,
            EventKind::Exception,
            EventKind::Return,
        ]
    );

    // the channel is removed once drained
    fixture.supervisor.stop().await;
    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);

    let channel = fixture.lines(OutputStream::Stdout).remove(0);
    assert!(channel.ends_with(".jsonl"), "{channel}");
    assert!(!std::path::Path::new(&channel).exists());
}

#[test(tokio::test)]
async fn start_stop() {
    let mut fixture = Fixture::new(indoc! {r#"
        echo started
        sleep 30
    "#});

    // stopping before starting does nothing
    fixture.supervisor.stop().await;
    assert_eq!(fixture.supervisor.state(), SupervisorState::NotStarted);

    fixture.supervisor.start().await.unwrap();
    assert!(fixture.supervisor.is_running());
    assert!(matches!(
        fixture.supervisor.start().await,
        Err(Error::AlreadyRunning)
    ));

    fixture.wait_for_line(OutputStream::Stdout, "started").await;
    let pid = fixture.supervisor.pid().unwrap();

    let begin = Instant::now();
    fixture.supervisor.stop().await;
    assert!(begin.elapsed() < Duration::from_secs(1));

    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);
    assert_eq!(fixture.supervisor.exit_code(), Some(143));
    assert!(ProcessTree::snapshot(pid, true).survivors().is_empty());

    // stopping twice is harmless
    fixture.supervisor.stop().await;
    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);

    // a stopped worker can be started again
    fixture.supervisor.start().await.unwrap();
    assert_eq!(fixture.supervisor.state(), SupervisorState::Running);
    assert_ne!(fixture.supervisor.pid(), Some(pid));

    fixture.supervisor.stop().await;
    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);
}

#[test(tokio::test)]
async fn restart_isolates_generations() {
    let mut fixture = Fixture::new(indoc! {r#"
        echo run
        printf '%s\n' '{"type":"call","function_name":"main","filename":"main.py","line_no":1}' >> "$RUNWATCH_TRACE_PATH"
        exec sleep 30
    "#});

    let collector = fixture.collector().clone();

    fixture.supervisor.start().await.unwrap();
    eventually(|| collector.calls().len() == 1).await;

    let old_pid = fixture.supervisor.pid();

    fixture.supervisor.restart().await.unwrap();

    let status = fixture.supervisor.status();
    assert_eq!(status.state, SupervisorState::Running);
    assert_eq!(status.generation, 1);
    assert_ne!(status.pid, old_pid);

    eventually(|| collector.calls().len() == 1).await;
    fixture.wait_for_line(OutputStream::Stdout, "run").await;

    let calls = collector.calls();
    assert_eq!(calls[0].call_id, 1);
    assert_eq!(calls[0].generation, 1);
    assert!(collector.output().iter().all(|line| line.generation == 1));

    while let Some(event) = collector.try_next_event() {
        assert_eq!(event.generation(), 1, "{event:?}");
    }

    fixture.supervisor.stop().await;
}

#[test(tokio::test)]
async fn stubborn_tree_is_killed() {
    let config = SupervisorConfig {
        stop_timeout: Duration::from_millis(500),
        ..test_config()
    };

    let mut fixture = Fixture::with_config(
        indoc! {r#"
            trap '' TERM
            echo ready
            while true; do sleep 0.1; done
        "#},
        config,
    );

    fixture.supervisor.start().await.unwrap();
    fixture.wait_for_line(OutputStream::Stdout, "ready").await;

    let pid = fixture.supervisor.pid().unwrap();

    let begin = Instant::now();
    fixture.supervisor.stop().await;
    let elapsed = begin.elapsed();

    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(500) + Duration::from_secs(2), "{elapsed:?}");

    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);
    assert_eq!(fixture.supervisor.exit_code(), Some(128 + 9));
    assert!(ProcessTree::snapshot(pid, true).survivors().is_empty());

    let system = fixture.lines(OutputStream::System);
    assert!(system.iter().any(|line| line.contains("killed after 500 ms")), "{system:?}");
}

#[test(tokio::test)]
async fn pause_discards_output() {
    let mut fixture = Fixture::new(indoc! {r#"
        echo before
        while [ ! -f go ]; do sleep 0.02; done
        echo during1
        echo during2
        touch written
        while [ ! -f resumed ]; do sleep 0.02; done
        echo after
    "#});

    fixture.supervisor.start().await.unwrap();
    fixture.wait_for_line(OutputStream::Stdout, "before").await;

    fixture.supervisor.pause().unwrap();
    assert!(fixture.supervisor.is_paused());
    assert!(fixture.collector().is_dispatch_paused());

    // pausing twice is harmless
    fixture.supervisor.pause().unwrap();

    touch(&fixture.path("go"));
    eventually(|| fixture.path("written").exists()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    fixture.supervisor.resume().unwrap();
    assert_eq!(fixture.supervisor.state(), SupervisorState::Running);

    let system = fixture.lines(OutputStream::System);
    assert!(
        system.contains(&"2 output lines discarded while paused".to_owned()),
        "{system:?}"
    );

    touch(&fixture.path("resumed"));
    assert_eq!(fixture.supervisor.wait().await, Some(WorkerExit::Code(0)));
    fixture.wait_for_line(OutputStream::Stdout, "after").await;

    assert_eq!(fixture.lines(OutputStream::Stdout), vec!["before", "after"]);
}

#[test(tokio::test)]
async fn exit_while_paused_lifts_pause() {
    let mut fixture = Fixture::new(indoc! {r#"
        echo before
        while [ ! -f go ]; do sleep 0.02; done
        echo during
        touch written
        while [ ! -f finish ]; do sleep 0.02; done
        exit 0
    "#});

    fixture.supervisor.start().await.unwrap();
    fixture.wait_for_line(OutputStream::Stdout, "before").await;

    fixture.supervisor.pause().unwrap();

    touch(&fixture.path("go"));
    eventually(|| fixture.path("written").exists()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    touch(&fixture.path("finish"));
    assert_eq!(fixture.supervisor.wait().await, Some(WorkerExit::Code(0)));

    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);
    assert!(!fixture.supervisor.is_paused());
    assert!(!fixture.collector().is_dispatch_paused());
    assert!(matches!(
        fixture.supervisor.resume(),
        Err(Error::NotRunning(SupervisorState::Stopped))
    ));

    let system = fixture.lines(OutputStream::System);
    assert!(
        system.contains(&"1 output lines discarded while paused".to_owned()),
        "{system:?}"
    );

    // the exit report reaches the live queue
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = fixture.supervisor.next_event().await {
            if matches!(&event, Event::Output(line) if line.content == "process exited with code 0")
            {
                break;
            }
        }
    })
    .await
    .expect("exit reported");
}

#[test(tokio::test)]
async fn pause_requires_worker() {
    let fixture = Fixture::new("exit 0\n");

    assert!(matches!(
        fixture.supervisor.pause(),
        Err(Error::NotRunning(SupervisorState::NotStarted))
    ));
    assert!(matches!(
        fixture.supervisor.resume(),
        Err(Error::NotRunning(SupervisorState::NotStarted))
    ));
}

#[test(tokio::test)]
async fn drop_kills_tree() {
    let mut fixture = Fixture::new(indoc! {r#"
        echo ready
        sleep 30
    "#});

    fixture.supervisor.start().await.unwrap();
    fixture.wait_for_line(OutputStream::Stdout, "ready").await;

    let pid = fixture.supervisor.pid().unwrap();
    eventually(|| ProcessTree::snapshot(pid, true).members().len() >= 2).await;
    let tree = ProcessTree::snapshot(pid, true);

    drop(fixture);

    eventually(|| tree.survivors().is_empty()).await;
}

/// Spawns a TERM-ignoring process which leaves the worker's tree (but not
/// its process group), and writes its PID to `orphan`.
const SPAWN_ORPHAN: &str = indoc! {r#"
    ( (trap '' TERM; exec sleep 30) >/dev/null 2>&1 & echo $! > orphan.tmp; mv orphan.tmp orphan )
"#};

async fn orphan_pid(fixture: &Fixture) -> u32 {
    let path = fixture.path("orphan");
    eventually(|| path.exists()).await;

    std::fs::read_to_string(&path)
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

#[test(tokio::test)]
async fn orphaned_group_member_is_killed_on_stop() {
    let config = SupervisorConfig {
        stop_timeout: Duration::from_millis(300),
        ..test_config()
    };

    let mut fixture = Fixture::with_config(&format!("{SPAWN_ORPHAN}echo ready\nsleep 30\n"), config);

    fixture.supervisor.start().await.unwrap();
    fixture.wait_for_line(OutputStream::Stdout, "ready").await;

    let orphan = orphan_pid(&fixture).await;
    let pid = fixture.supervisor.pid().unwrap();
    assert!(
        !ProcessTree::snapshot(pid, true)
            .members()
            .iter()
            .any(|member| member.as_raw() as u32 == orphan)
    );

    fixture.supervisor.stop().await;

    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);
    eventually(|| ProcessTree::snapshot(orphan, true).survivors().is_empty()).await;

    let system = fixture.lines(OutputStream::System);
    assert!(system.iter().any(|line| line.contains("killed after 300 ms")), "{system:?}");
}

#[test(tokio::test)]
async fn orphaned_group_member_is_killed_after_exit() {
    let config = SupervisorConfig {
        stop_timeout: Duration::from_millis(300),
        ..test_config()
    };

    let mut fixture = Fixture::with_config(&format!("{SPAWN_ORPHAN}exit 0\n"), config);

    fixture.supervisor.start().await.unwrap();
    assert_eq!(fixture.supervisor.wait().await, Some(WorkerExit::Code(0)));

    let orphan = orphan_pid(&fixture).await;
    assert!(!ProcessTree::snapshot(orphan, true).survivors().is_empty());

    fixture.supervisor.stop().await;

    assert_eq!(fixture.supervisor.state(), SupervisorState::Stopped);
    eventually(|| ProcessTree::snapshot(orphan, true).survivors().is_empty()).await;
}
