use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use tempfile::tempdir;
use timestamper::annotator::{
    AnnotationSession, ElapsedTimeFormat, FixedFormatProvider, Flow, FormatProvider, LogPosition,
    SessionState,
};
use timestamper::core::{StoreLocation, TimestampStoreReader, TimestampStoreWriter, WriterConfig};
use timestamper::{Error, Timestamp};

fn formats() -> Arc<dyn FormatProvider> {
    Arc::new(FixedFormatProvider::new(ElapsedTimeFormat))
}

/// Writes five records and returns the data file length after the third.
fn write_five(location: &StoreLocation) -> u64 {
    let mut writer =
        TimestampStoreWriter::create(location, WriterConfig::default()).expect("create store");
    let mut after_three = 0;
    for (i, millis) in [0u64, 1_000, 2_000, 3_000, 4_000].into_iter().enumerate() {
        writer.append(Timestamp::new(millis, millis as i64)).expect("append");
        if i == 2 {
            after_three = writer.data_len();
        }
    }
    writer.finish().expect("finish");
    after_three
}

fn annotate_all(session: &mut AnnotationSession<LogPosition>, count: usize) -> Vec<(String, Flow)> {
    (0..count)
        .map(|i| {
            let mut line = format!("line {i}");
            let flow = session.annotate(&mut line);
            (line, flow)
        })
        .collect()
}

#[test]
fn truncated_store_annotates_what_survives() {
    let dir = tempdir().expect("tempdir");
    let location = StoreLocation::new(dir.path().join("run"));
    let after_three = write_five(&location);

    // Keep the tag byte of the fourth record only.
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(location.data_path())
        .expect("open data");
    file.set_len(after_three + 1).expect("truncate");
    drop(file);

    let mut session = AnnotationSession::new(LogPosition::at_line(0), location, formats());
    let results = annotate_all(&mut session, 5);
    assert_eq!(results[0], ("[00:00:00.000] line 0".to_string(), Flow::Continue));
    assert_eq!(results[1], ("[00:00:01.000] line 1".to_string(), Flow::Continue));
    assert_eq!(results[2], ("[00:00:02.000] line 2".to_string(), Flow::Continue));
    assert_eq!(results[3], ("line 3".to_string(), Flow::Stop));
    assert_eq!(results[4], ("line 4".to_string(), Flow::Stop));
    assert!(session.is_closed());
}

#[test]
fn garbage_record_stops_the_pass() {
    let dir = tempdir().expect("tempdir");
    let location = StoreLocation::new(dir.path().join("run"));
    let after_three = write_five(&location);

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(location.data_path())
        .expect("open data");
    file.seek(SeekFrom::Start(after_three)).expect("seek");
    file.write_all(&[0xEE]).expect("overwrite tag");
    drop(file);

    let mut reader = TimestampStoreReader::open(&location).expect("open reader");
    reader.skip(3).expect("skip");
    assert!(matches!(
        reader.read(),
        Err(Error::CorruptRecord { line: 3, reason: "unknown record tag", .. })
    ));
    assert_eq!(reader.read().expect("read after failure"), None);

    let mut session = AnnotationSession::new(LogPosition::at_line(1), location, formats());
    let results = annotate_all(&mut session, 3);
    assert_eq!(results[0].1, Flow::Continue);
    assert_eq!(results[1].1, Flow::Continue);
    assert_eq!(results[1].0, "[00:00:02.000] line 1");
    assert_eq!(results[2], ("line 2".to_string(), Flow::Stop));
}

#[test]
fn suspended_session_resumes_at_the_next_line() {
    let dir = tempdir().expect("tempdir");
    let location = StoreLocation::new(dir.path().join("run"));
    write_five(&location);

    let mut session = AnnotationSession::new(LogPosition::at_line(1), location.clone(), formats());
    let mut line = String::from("one");
    assert_eq!(session.annotate(&mut line), Flow::Continue);
    assert_eq!(line, "[00:00:01.000] one");

    let json = serde_json::to_string(&session.suspend()).expect("serialize state");
    let state: SessionState = serde_json::from_str(&json).expect("deserialize state");

    // A positioner that would send the pass elsewhere proves it is not consulted.
    let mut resumed =
        AnnotationSession::resume(LogPosition::end_of_file(), location, formats(), state);
    let mut line = String::from("two");
    assert_eq!(resumed.annotate(&mut line), Flow::Continue);
    assert_eq!(line, "[00:00:02.000] two");

    let state = resumed.state();
    match state {
        SessionState::Positioned { cursor } => assert_eq!(cursor.line, 3),
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn closed_state_resumes_closed() {
    let dir = tempdir().expect("tempdir");
    let location = StoreLocation::new(dir.path().join("run"));
    write_five(&location);

    let mut session = AnnotationSession::new(LogPosition::at_line(4), location.clone(), formats());
    let mut line = String::new();
    assert_eq!(session.annotate(&mut line), Flow::Continue);
    assert_eq!(session.annotate(&mut line), Flow::Stop);
    let state = session.suspend();
    assert_eq!(state, SessionState::Closed);

    let mut resumed = AnnotationSession::resume(LogPosition::at_line(0), location, formats(), state);
    let mut line = String::from("ignored");
    assert_eq!(resumed.annotate(&mut line), Flow::Stop);
    assert_eq!(line, "ignored");
}

#[test]
fn resume_against_a_replaced_store_stops() {
    let dir = tempdir().expect("tempdir");
    let location = StoreLocation::new(dir.path().join("run"));
    write_five(&location);

    let mut session = AnnotationSession::new(LogPosition::at_line(3), location.clone(), formats());
    let mut line = String::new();
    assert_eq!(session.annotate(&mut line), Flow::Continue);
    let state = session.suspend();

    // A new run rewrites the store with a single record.
    let mut writer =
        TimestampStoreWriter::create(&location, WriterConfig::default()).expect("recreate store");
    writer.append(Timestamp::new(0, 0)).expect("append");
    writer.finish().expect("finish");

    let mut resumed = AnnotationSession::resume(LogPosition::at_line(0), location, formats(), state);
    let mut line = String::from("line 4");
    assert_eq!(resumed.annotate(&mut line), Flow::Stop);
    assert_eq!(line, "line 4");
}

#[test]
fn store_recreated_mid_pass_finishes_from_the_old_snapshot() {
    let dir = tempdir().expect("tempdir");
    let location = StoreLocation::new(dir.path().join("run"));
    let mut writer =
        TimestampStoreWriter::create(&location, WriterConfig::default()).expect("create store");
    for i in 0..2_000u64 {
        writer
            .append(Timestamp::new(i * 10, i as i64 * 10))
            .expect("append");
    }
    writer.finish().expect("finish");

    let mut session =
        AnnotationSession::new(LogPosition::at_line(1_500), location.clone(), formats());
    let mut line = String::from("line 1500");
    assert_eq!(session.annotate(&mut line), Flow::Continue);
    assert_eq!(line, "[00:00:15.000] line 1500");

    // A new run starts over while the pass is still streaming.
    let mut writer =
        TimestampStoreWriter::create(&location, WriterConfig::default()).expect("recreate store");
    writer.append(Timestamp::new(0, 0)).expect("append");
    writer.finish().expect("finish");

    let mut line = String::from("line 1501");
    assert_eq!(session.annotate(&mut line), Flow::Continue);
    assert_eq!(line, "[00:00:15.010] line 1501");
    let results = annotate_all(&mut session, 500);
    assert!(results[..498].iter().all(|(_, flow)| *flow == Flow::Continue));
    assert_eq!(results[498], ("line 498".to_string(), Flow::Stop));
    assert_eq!(results[499], ("line 499".to_string(), Flow::Stop));
    assert!(session.is_closed());

    let mut fresh = AnnotationSession::new(LogPosition::at_line(0), location, formats());
    let results = annotate_all(&mut fresh, 2);
    assert_eq!(results[0], ("[00:00:00.000] line 0".to_string(), Flow::Continue));
    assert_eq!(results[1], ("line 1".to_string(), Flow::Stop));
}
