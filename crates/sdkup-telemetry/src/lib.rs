//! Fire-and-forget telemetry sink.
//!
//! Events are queued on a bounded channel with `try_send` and written as JSON
//! lines by a background thread, so recording an event never blocks and never
//! fails the caller. Values that may identify the user (captured process
//! output, paths under a home directory) are passed separately as *sensitive*
//! and are only written verbatim when `SDKUP_TELEMETRY_SENSITIVE` is enabled.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, OnceLock};

use sdkup_util::{env_flag, now_millis};
use serde::Serialize;

const EVENT_QUEUE_CAPACITY: usize = 256;
const MAX_EVENT_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct TelemetryOptions {
    pub app_name: &'static str,
    pub app_version: &'static str,
    pub usage_enabled: bool,
    pub crash_enabled: bool,
    pub sensitive_enabled: bool,
    pub sink_dir: Option<PathBuf>,
}

pub struct Telemetry {
    app_name: String,
    app_version: String,
    session_id: String,
    sink_dir: PathBuf,
    usage_enabled: AtomicBool,
    crash_enabled: AtomicBool,
    sensitive_enabled: AtomicBool,
    sender: SyncSender<TelemetryEvent>,
}

#[derive(Serialize, Debug)]
struct TelemetryEvent {
    event_type: String,
    at_unix_millis: i64,
    app: String,
    version: String,
    session_id: String,
    properties: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    sensitive: BTreeMap<String, String>,
    contains_sensitive: bool,
}

#[derive(Serialize)]
struct CrashReport {
    at_unix_millis: i64,
    app: String,
    version: String,
    session_id: String,
    message: String,
    location: Option<String>,
    backtrace: Option<String>,
}

static TELEMETRY: OnceLock<Arc<Telemetry>> = OnceLock::new();

pub fn init(options: TelemetryOptions) -> Arc<Telemetry> {
    if let Some(existing) = TELEMETRY.get() {
        existing.update_from_options(&options);
        return Arc::clone(existing);
    }

    let (sender, receiver) = sync_channel(EVENT_QUEUE_CAPACITY);
    let telemetry = Arc::new(Telemetry::new(&options, sender));

    start_writer_thread(Arc::clone(&telemetry), receiver);
    install_panic_hook(Arc::clone(&telemetry));

    let _ = TELEMETRY.set(Arc::clone(&telemetry));
    telemetry
}

pub fn init_with_env(app_name: &'static str, app_version: &'static str) -> Arc<Telemetry> {
    init(TelemetryOptions {
        app_name,
        app_version,
        usage_enabled: env_flag("SDKUP_TELEMETRY"),
        crash_enabled: env_flag("SDKUP_TELEMETRY_CRASH"),
        sensitive_enabled: env_flag("SDKUP_TELEMETRY_SENSITIVE"),
        sink_dir: None,
    })
}

/// Records a plain key/value event. A no-op until [`init`] has run.
pub fn event(event_type: &str, properties: &[(&str, &str)]) {
    if let Some(telemetry) = TELEMETRY.get() {
        telemetry.event(event_type, properties, &[]);
    }
}

/// Records an error together with its diagnostic annotations.
///
/// `annotations` must be non-identifying (stage names, exit codes, error
/// kinds). Anything captured from the user's machine goes in `sensitive`.
pub fn error_event(
    event_type: &str,
    error: &dyn std::error::Error,
    annotations: &[(&str, String)],
    sensitive: &[(&str, String)],
) {
    let Some(telemetry) = TELEMETRY.get() else {
        return;
    };
    let message = error.to_string();
    let mut properties: Vec<(&str, &str)> = vec![("error", message.as_str())];
    properties.extend(annotations.iter().map(|(k, v)| (*k, v.as_str())));
    let sensitive: Vec<(&str, &str)> = sensitive.iter().map(|(k, v)| (*k, v.as_str())).collect();
    telemetry.event(event_type, &properties, &sensitive);
}

impl Telemetry {
    fn new(options: &TelemetryOptions, sender: SyncSender<TelemetryEvent>) -> Self {
        Self {
            app_name: options.app_name.to_string(),
            app_version: options.app_version.to_string(),
            session_id: new_session_id(),
            sink_dir: options
                .sink_dir
                .clone()
                .unwrap_or_else(|| sdkup_util::data_dir().join("telemetry")),
            usage_enabled: AtomicBool::new(options.usage_enabled),
            crash_enabled: AtomicBool::new(options.crash_enabled),
            sensitive_enabled: AtomicBool::new(options.sensitive_enabled),
            sender,
        }
    }

    fn update_from_options(&self, options: &TelemetryOptions) {
        self.usage_enabled
            .store(options.usage_enabled, Ordering::Relaxed);
        self.crash_enabled
            .store(options.crash_enabled, Ordering::Relaxed);
        self.sensitive_enabled
            .store(options.sensitive_enabled, Ordering::Relaxed);
    }

    fn event(&self, event_type: &str, properties: &[(&str, &str)], sensitive: &[(&str, &str)]) {
        if !self.usage_enabled.load(Ordering::Relaxed) {
            return;
        }
        let event = self.build_event(event_type, properties, sensitive);
        let _ = self.sender.try_send(event);
    }

    fn build_event(
        &self,
        event_type: &str,
        properties: &[(&str, &str)],
        sensitive: &[(&str, &str)],
    ) -> TelemetryEvent {
        let keep_sensitive = self.sensitive_enabled.load(Ordering::Relaxed);
        let mut props = BTreeMap::new();
        for (key, value) in properties {
            if !key.trim().is_empty() {
                props.insert((*key).to_string(), (*value).to_string());
            }
        }
        let mut tagged = BTreeMap::new();
        for (key, value) in sensitive {
            if key.trim().is_empty() || value.is_empty() {
                continue;
            }
            let recorded = if keep_sensitive {
                (*value).to_string()
            } else {
                format!("<redacted {} bytes>", value.len())
            };
            tagged.insert((*key).to_string(), recorded);
        }
        TelemetryEvent {
            event_type: event_type.to_string(),
            at_unix_millis: now_millis(),
            app: self.app_name.clone(),
            version: self.app_version.clone(),
            session_id: self.session_id.clone(),
            contains_sensitive: !tagged.is_empty(),
            properties: props,
            sensitive: tagged,
        }
    }

    fn crash_report(&self, message: String, location: Option<String>, backtrace: Option<String>) {
        if !self.crash_enabled.load(Ordering::Relaxed) {
            return;
        }
        let report = CrashReport {
            at_unix_millis: now_millis(),
            app: self.app_name.clone(),
            version: self.app_version.clone(),
            session_id: self.session_id.clone(),
            message,
            location,
            backtrace,
        };
        write_crash_report(&self.sink_dir, &self.app_name, &report);
        let event = self.build_event("crash", &[], &[]);
        let _ = self.sender.try_send(event);
    }
}

fn start_writer_thread(telemetry: Arc<Telemetry>, receiver: Receiver<TelemetryEvent>) {
    std::thread::spawn(move || {
        while let Ok(event) = receiver.recv() {
            write_event(&telemetry.sink_dir, &telemetry.app_name, &event);
        }
    });
}

fn install_panic_hook(telemetry: Arc<Telemetry>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            (*msg).to_string()
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.clone()
        } else {
            "panic".to_string()
        };
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()));
        let backtrace = Some(format!("{:?}", std::backtrace::Backtrace::capture()));
        telemetry.crash_report(message, location, backtrace);
        default_hook(info);
    }));
}

fn write_event(sink_dir: &Path, app_name: &str, event: &TelemetryEvent) {
    let dir = sink_dir.join(app_name);
    if let Err(err) = fs::create_dir_all(&dir) {
        eprintln!("telemetry: failed to create {}: {err}", dir.display());
        return;
    }

    let path = dir.join("events.jsonl");
    if rotate_if_needed(&path).is_err() {
        return;
    }

    let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("telemetry: failed to open {}: {err}", path.display());
            return;
        }
    };
    if let Ok(line) = serde_json::to_string(event) {
        let _ = writeln!(file, "{line}");
    }
}

fn rotate_if_needed(path: &Path) -> std::io::Result<()> {
    if let Ok(meta) = fs::metadata(path) {
        if meta.len() >= MAX_EVENT_BYTES {
            let rotated = path.with_extension("jsonl.1");
            let _ = fs::remove_file(&rotated);
            fs::rename(path, rotated)?;
        }
    }
    Ok(())
}

fn write_crash_report(sink_dir: &Path, app_name: &str, report: &CrashReport) {
    let dir = sink_dir.join(app_name).join("crashes");
    if let Err(err) = fs::create_dir_all(&dir) {
        eprintln!("telemetry: failed to create {}: {err}", dir.display());
        return;
    }
    let filename = format!(
        "crash-{}-{}.json",
        report.at_unix_millis,
        std::process::id()
    );
    let path = dir.join(filename);
    if let Ok(file) = OpenOptions::new().create(true).write(true).open(&path) {
        let _ = serde_json::to_writer_pretty(file, report);
    }
}

fn new_session_id() -> String {
    let now = now_millis();
    let pid = std::process::id();
    format!("{now:x}-{pid:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry(sensitive_enabled: bool, dir: &Path) -> (Telemetry, Receiver<TelemetryEvent>) {
        let (sender, receiver) = sync_channel(4);
        let options = TelemetryOptions {
            app_name: "sdkup-test",
            app_version: "0.0.0",
            usage_enabled: true,
            crash_enabled: false,
            sensitive_enabled,
            sink_dir: Some(dir.to_path_buf()),
        };
        (Telemetry::new(&options, sender), receiver)
    }

    #[test]
    fn sensitive_values_are_redacted_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let (telemetry, _rx) = telemetry(false, dir.path());
        let event = telemetry.build_event(
            "stage.failed",
            &[("stage", "post_install"), ("exit_code", "1")],
            &[("stderr", "Error: /home/alice/sdk is not writable")],
        );

        assert_eq!(event.properties["stage"], "post_install");
        assert!(event.contains_sensitive);
        assert_eq!(event.sensitive["stderr"], "<redacted 38 bytes>");
    }

    #[test]
    fn sensitive_values_kept_when_opted_in() {
        let dir = tempfile::tempdir().unwrap();
        let (telemetry, _rx) = telemetry(true, dir.path());
        let event = telemetry.build_event("stage.failed", &[], &[("stderr", "boom")]);
        assert_eq!(event.sensitive["stderr"], "boom");
    }

    #[test]
    fn empty_keys_and_values_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (telemetry, _rx) = telemetry(false, dir.path());
        let event = telemetry.build_event("x", &[(" ", "v")], &[("stderr", "")]);
        assert!(event.properties.is_empty());
        assert!(!event.contains_sensitive);
    }

    #[test]
    fn event_never_blocks_when_queue_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let (telemetry, rx) = telemetry(false, dir.path());
        for _ in 0..32 {
            telemetry.event("stage.completed", &[("stage", "download")], &[]);
        }
        assert_eq!(rx.try_iter().count(), 4);
    }

    #[test]
    fn write_event_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (telemetry, _rx) = telemetry(false, dir.path());
        let event = telemetry.build_event("stage.skipped", &[("stage", "install")], &[]);
        write_event(dir.path(), "sdkup-test", &event);
        write_event(dir.path(), "sdkup-test", &event);

        let raw = fs::read_to_string(dir.path().join("sdkup-test/events.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("\"event_type\":\"stage.skipped\""));
    }
}
