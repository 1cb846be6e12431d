use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{self, write};
use std::path::Path;
use tempfile::{tempdir, NamedTempFile, TempDir};

/// Writes a config rooted at `root` with the text stage, and optionally a synthesize
/// stage pointing at `synth_endpoint`. No notify section, so nothing leaves the machine.
fn create_config(root: &Path, synth_endpoint: Option<&str>) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let mut yaml = format!(
        r#"store:
  root: {root}
timeout_secs: 5
stages:
  - name: text-to-ssml
    transform: ssml
    accepted_extension: .txt
    output_extension: .ssml
    source_container: text-files
    artifact_container: ssml-files-bucket
    archive_container: text-ssml-completion
    archive_sub_path: text
"#,
        root = root.display()
    );
    if let Some(endpoint) = synth_endpoint {
        yaml.push_str(&format!(
            r#"  - name: ssml-to-audio
    transform: synthesize
    accepted_extension: .ssml
    output_extension: .mp3
    source_container: ssml-files-bucket
    artifact_container: audio-files-bucket1
    archive_container: text-ssml-completion
    archive_sub_path: ssml
synthesizer:
  endpoint: {endpoint}
"#
        ));
    }
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

fn seed(root: &TempDir, container: &str, key: &str, content: &str) {
    let path = root.path().join(container).join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    write(path, content).unwrap();
}

fn handle(config: &NamedTempFile, stage: &str, event: &str) -> assert_cmd::assert::Assert {
    Command::cargo_bin("speech-bucket")
        .expect("Binary exists")
        .env_remove("SPEECH_BUCKET_ACCESS_TOKEN")
        .arg("handle")
        .arg("--config")
        .arg(config.path())
        .arg("--stage")
        .arg(stage)
        .arg("--event")
        .arg(event)
        .assert()
}

#[test]
fn handle_converts_text_and_archives_source() {
    let root = tempdir().unwrap();
    seed(&root, "text-files", "greeting.txt", "Hi there. Bye now.");
    let config = create_config(root.path(), None);

    handle(
        &config,
        "text-to-ssml",
        r#"{"bucket":"text-files","name":"greeting.txt"}"#,
    )
    .success()
    .stdout(predicate::str::contains(
        "Converted greeting.txt to ssml-files-bucket/greeting.ssml",
    ));

    let ssml = fs::read_to_string(root.path().join("ssml-files-bucket/greeting.ssml")).unwrap();
    assert_eq!(
        ssml,
        r#"<speak>Hi there.<break time="1s"/>Bye now.<break time="1s"/></speak>"#
    );
    assert!(root.path().join("text-ssml-completion/text/greeting.txt").is_file());
    assert!(!root.path().join("text-files/greeting.txt").exists());

    // Redelivery of the same event is a no-op.
    handle(
        &config,
        "text-to-ssml",
        r#"{"bucket":"text-files","name":"greeting.txt"}"#,
    )
    .success()
    .stdout(predicate::str::contains("Already processed greeting.txt"));
}

#[test]
fn handle_reads_event_from_stdin() {
    let root = tempdir().unwrap();
    seed(&root, "text-files", "note.txt", "One. Two.");
    let config = create_config(root.path(), None);

    Command::cargo_bin("speech-bucket")
        .unwrap()
        .arg("handle")
        .arg("--config")
        .arg(config.path())
        .arg("--stage")
        .arg("text-to-ssml")
        .write_stdin(r#"{"data":{"container":"text-files","key":"note.txt"}}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("Converted note.txt"));
    assert!(root.path().join("ssml-files-bucket/note.ssml").is_file());
}

#[test]
fn handle_skips_foreign_extension() {
    let root = tempdir().unwrap();
    seed(&root, "text-files", "photo.png", "not text");
    let config = create_config(root.path(), None);

    handle(
        &config,
        "text-to-ssml",
        r#"{"container":"text-files","key":"photo.png"}"#,
    )
    .success()
    .stdout(predicate::str::contains("Skipped photo.png"));
    assert!(root.path().join("text-files/photo.png").is_file());
    assert!(!root.path().join("ssml-files-bucket").exists());
}

#[test]
fn handle_missing_source_is_a_permanent_failure() {
    let root = tempdir().unwrap();
    let config = create_config(root.path(), None);

    handle(
        &config,
        "text-to-ssml",
        r#"{"container":"text-files","key":"ghost.txt"}"#,
    )
    .failure()
    .code(1)
    .stderr(predicate::str::contains("[ERROR]"));
}

#[test]
fn handle_unreachable_synthesizer_asks_for_redelivery() {
    let root = tempdir().unwrap();
    seed(&root, "ssml-files-bucket", "greeting.ssml", "<speak>Hi.</speak>");
    // Port 9 (discard) is not listening in test environments: connection refused.
    let config = create_config(root.path(), Some("http://127.0.0.1:9/v1/text:synthesize"));

    handle(
        &config,
        "ssml-to-audio",
        r#"{"container":"ssml-files-bucket","key":"greeting.ssml"}"#,
    )
    .failure()
    .code(75);
    assert!(root.path().join("ssml-files-bucket/greeting.ssml").is_file());
    assert!(!root.path().join("text-ssml-completion/ssml/greeting.ssml").exists());
}

#[test]
fn handle_unknown_stage_fails() {
    let root = tempdir().unwrap();
    let config = create_config(root.path(), None);

    handle(&config, "nope", r#"{"container":"text-files","key":"a.txt"}"#)
        .failure()
        .code(1)
        .stderr(predicate::str::contains("No stage named"));
}

#[test]
fn sweep_deletes_archived_leftovers() {
    let root = tempdir().unwrap();
    seed(&root, "text-files", "done.txt", "Old.");
    seed(&root, "text-ssml-completion", "text/done.txt", "Old.");
    seed(&root, "text-files", "fresh.txt", "New.");
    let config = create_config(root.path(), None);

    Command::cargo_bin("speech-bucket")
        .unwrap()
        .arg("sweep")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Swept text-to-ssml: deleted 1, pending 1"));

    assert!(!root.path().join("text-files/done.txt").exists());
    assert!(root.path().join("text-files/fresh.txt").is_file());
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use speech_bucket::cli::{run, Cli, Commands};

    // A dummy path: loading fails, but the trace event comes first.
    let cli = Cli {
        command: Commands::Sweep {
            config: std::path::PathBuf::from("dummy.yaml"),
            stage: None,
        },
    };

    let result = run(cli).await;
    assert!(result.is_err());

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
