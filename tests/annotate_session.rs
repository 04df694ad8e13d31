use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use timestamper::annotator::{
    AnnotationSession, ConsoleLogPositioner, Flow, FormatProvider, LogPosition, LogPositioner,
    SessionState, TimestampFormat,
};
use timestamper::core::{StoreLocation, TimestampStoreWriter, WriterConfig};
use timestamper::{Result, Timestamp};

/// Renders `<elapsed>` so tests can see exactly which record landed on a line.
struct ElapsedTag;

impl TimestampFormat for ElapsedTag {
    fn render(&self, timestamp: &Timestamp) -> String {
        format!("<{}>", timestamp.elapsed_millis)
    }
}

#[derive(Default)]
struct CountingFormats {
    resolved: AtomicUsize,
}

impl FormatProvider for CountingFormats {
    fn format(&self) -> Arc<dyn TimestampFormat> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        Arc::new(ElapsedTag)
    }
}

/// Positioner that records how often it was asked.
struct CountingPositioner {
    position: LogPosition,
    seeks: Arc<AtomicUsize>,
}

impl LogPositioner for CountingPositioner {
    fn seek(&mut self) -> Result<LogPosition> {
        self.seeks.fetch_add(1, Ordering::SeqCst);
        Ok(self.position)
    }
}

const SCENARIO: [u64; 5] = [0, 100, 250, 400, 400];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_store(dir: &TempDir, elapsed: &[u64]) -> StoreLocation {
    let location = StoreLocation::new(dir.path().join("timestamps"));
    let mut writer =
        TimestampStoreWriter::create(&location, WriterConfig::default()).expect("create store");
    for &millis in elapsed {
        writer
            .append(Timestamp::new(millis, 1_700_000_000_000 + millis as i64))
            .expect("append");
    }
    writer.finish().expect("finish");
    location
}

/// Feed lines to the session until it stops; returns the rendered lines and
/// how many calls returned `Continue`.
fn render<P: LogPositioner>(session: &mut AnnotationSession<P>, lines: usize) -> (Vec<String>, usize) {
    let mut rendered = Vec::new();
    let mut continued = 0;
    let mut annotating = true;
    for i in 0..lines {
        let mut line = format!("line {i}");
        if annotating {
            annotating = session.annotate(&mut line) == Flow::Continue;
            if annotating {
                continued += 1;
            }
        }
        rendered.push(line);
    }
    (rendered, continued)
}

#[test]
fn pass_starting_at_line_two() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let location = write_store(&dir, &SCENARIO);
    let formats = Arc::new(CountingFormats::default());
    let mut session = AnnotationSession::new(LogPosition::at_line(2), location, formats.clone());

    let mut first = String::from("third");
    assert_eq!(session.annotate(&mut first), Flow::Continue);
    assert_eq!(first, "<250>third");

    let mut second = String::from("fourth");
    assert_eq!(session.annotate(&mut second), Flow::Continue);
    assert_eq!(second, "<400>fourth");

    let mut third = String::from("fifth");
    assert_eq!(session.annotate(&mut third), Flow::Continue);
    assert_eq!(third, "<400>fifth");

    let mut fourth = String::from("sixth");
    assert_eq!(session.annotate(&mut fourth), Flow::Stop);
    assert_eq!(fourth, "sixth");

    assert_eq!(formats.resolved.load(Ordering::SeqCst), 1);
}

#[test]
fn end_of_file_stops_before_any_store_io() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    // No store is ever written here; opening one would fail.
    let location = StoreLocation::new(dir.path().join("missing"));
    let seeks = Arc::new(AtomicUsize::new(0));
    let positioner = CountingPositioner {
        position: LogPosition::end_of_file(),
        seeks: seeks.clone(),
    };
    let formats = Arc::new(CountingFormats::default());
    let mut session = AnnotationSession::new(positioner, location, formats.clone());

    let mut line = String::from("tail");
    assert_eq!(session.annotate(&mut line), Flow::Stop);
    assert_eq!(line, "tail");
    assert_eq!(session.annotate(&mut line), Flow::Stop);
    assert_eq!(seeks.load(Ordering::SeqCst), 1);
    assert_eq!(formats.resolved.load(Ordering::SeqCst), 0);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!dir.path().join("missing").exists());
}

#[test]
fn end_relative_start_matches_absolute_start() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let location = write_store(&dir, &SCENARIO);

    let mut relative = AnnotationSession::new(
        LogPosition::at_line(-2),
        location.clone(),
        Arc::new(CountingFormats::default()),
    );
    let mut absolute = AnnotationSession::new(
        LogPosition::at_line(3),
        location,
        Arc::new(CountingFormats::default()),
    );

    let from_end = render(&mut relative, 4);
    let from_start = render(&mut absolute, 4);
    assert_eq!(from_end, from_start);
    assert_eq!(
        from_end.0,
        vec!["<400>line 0", "<400>line 1", "line 2", "line 3"]
    );
    assert_eq!(from_end.1, 2);
}

#[test]
fn end_relative_start_beyond_store_starts_at_first_line() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let location = write_store(&dir, &SCENARIO);
    let mut session = AnnotationSession::new(
        LogPosition::at_line(-50),
        location,
        Arc::new(CountingFormats::default()),
    );

    let (lines, continued) = render(&mut session, 6);
    assert_eq!(lines[0], "<0>line 0");
    assert_eq!(lines[4], "<400>line 4");
    assert_eq!(lines[5], "line 5");
    assert_eq!(continued, 5);
}

#[test]
fn missing_store_stops_quietly() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let location = StoreLocation::new(dir.path().join("not-yet-written"));
    let mut session = AnnotationSession::new(
        LogPosition::at_line(0),
        location,
        Arc::new(CountingFormats::default()),
    );

    let (lines, continued) = render(&mut session, 3);
    assert_eq!(lines, vec!["line 0", "line 1", "line 2"]);
    assert_eq!(continued, 0);
}

#[test]
fn console_log_offsets_drive_the_pass() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let location = write_store(&dir, &SCENARIO);
    let log_path = dir.path().join("console.log");
    std::fs::write(&log_path, "zero\none\ntwo\nthree\nfour\n").expect("write log");

    // "three\nfour\n" is the last 11 bytes.
    let mut from_end = AnnotationSession::new(
        ConsoleLogPositioner::new(&log_path, -11),
        location.clone(),
        Arc::new(CountingFormats::default()),
    );
    let (lines, _) = render(&mut from_end, 2);
    assert_eq!(lines, vec!["<400>line 0", "<400>line 1"]);

    // Offset 10 is the "w" in "two": that line's timestamp is consumed unseen.
    let mut mid_line = AnnotationSession::new(
        ConsoleLogPositioner::new(&log_path, 10),
        location,
        Arc::new(CountingFormats::default()),
    );
    let (lines, _) = render(&mut mid_line, 2);
    assert_eq!(lines, vec!["line 0", "<400>line 1"]);
}

#[test]
fn separate_passes_are_independent() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let location = StoreLocation::new(dir.path().join("timestamps"));

    let mut early = AnnotationSession::new(
        LogPosition::at_line(0),
        location.clone(),
        Arc::new(CountingFormats::default()),
    );
    assert_eq!(render(&mut early, 2).1, 0);

    let mut writer =
        TimestampStoreWriter::create(&location, WriterConfig::default()).expect("create store");
    writer.append(Timestamp::new(0, 0)).expect("append");
    writer.append(Timestamp::new(7, 7)).expect("append");
    writer.finish().expect("finish");

    let mut later = AnnotationSession::new(
        LogPosition::at_line(0),
        location,
        Arc::new(CountingFormats::default()),
    );
    let (lines, continued) = render(&mut later, 3);
    assert_eq!(lines, vec!["<0>line 0", "<7>line 1", "line 2"]);
    assert_eq!(continued, 2);
}

#[test]
fn pass_starting_exactly_at_store_end() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let location = write_store(&dir, &SCENARIO);
    let formats = Arc::new(CountingFormats::default());
    let mut session = AnnotationSession::new(LogPosition::at_line(5), location, formats.clone());

    // Positioning succeeds but finds no record for this line.
    let mut first = String::from("sixth");
    assert_eq!(session.annotate(&mut first), Flow::Continue);
    assert_eq!(first, "sixth");
    assert_eq!(session.state(), SessionState::Closed);

    let mut second = String::from("seventh");
    assert_eq!(session.annotate(&mut second), Flow::Stop);
    assert_eq!(second, "seventh");
    assert!(session.is_closed());
    assert_eq!(formats.resolved.load(Ordering::SeqCst), 0);
}
