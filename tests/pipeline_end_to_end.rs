use tempfile::tempdir;

use evento::control::ControlPlane;
use evento::storage::FrameLog;
use evento::{
    bootstrap, decode_frame, AppMode, EventConfig, EventType, Orchestrator, PipelineContext,
    PipelineSettings, ReplayDetector, RoiConfigStore, RoiSlot, ShutdownSignal,
    SqliteControlPlane, SqliteFrameLog, StopReason, SyntheticSource, Tick,
};

const LANE: [[i32; 2]; 4] = [[0, 0], [80, 0], [80, 60], [0, 60]];

fn write_regions(store: &RoiConfigStore) {
    for event in EventType::ALL {
        let mut config = EventConfig::empty(event);
        config.set_vertices(RoiSlot::Roi1, LANE.to_vec());
        store.save(&config).expect("save regions");
    }
}

fn replay(frames: usize) -> ReplayDetector {
    // one car and one person in ROI 1 on every frame
    let line = r#"[{"class_id":2,"score":0.9,"xmin":10,"ymin":10,"xmax":30,"ymax":30},{"class_id":0,"score":0.8,"xmin":40,"ymin":20,"xmax":50,"ymax":40}]"#;
    let raw = vec![line; frames].join("\n");
    ReplayDetector::from_lines(&raw).expect("replay lines")
}

#[test]
fn producer_and_control_surface_share_one_database() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("evento.db");
    let db = db.to_str().unwrap();
    let store = RoiConfigStore::new(dir.path().join("config"));
    write_regions(&store);

    let mut control = SqliteControlPlane::open(db).unwrap();
    let mut log = SqliteFrameLog::open(db, "camera:0", 3).unwrap();
    bootstrap(&mut control, &mut log, 85).unwrap();
    assert_eq!(log.len().unwrap(), 1);

    let mut surface = SqliteControlPlane::open(db).unwrap();
    assert_eq!(surface.read_mode().unwrap(), AppMode::Configuring);

    let context = PipelineContext::new(Box::new(control), store.clone(), None).unwrap();
    let mut orch = Orchestrator::new(
        context,
        Box::new(SyntheticSource::new("lane", Some(6), 120, 90)),
        Box::new(replay(6)),
        Box::new(log),
        PipelineSettings::default(),
    );

    // configuring: raw frames only
    assert_eq!(orch.tick().unwrap(), Tick::Configuring);
    let raw = surface
        .latest_raw_frame(EventType::EventStat)
        .unwrap()
        .expect("raw frame");
    assert_eq!(decode_frame(&raw).unwrap().dimensions(), (120, 90));

    // the operator adds a second region while configuring, then starts streaming
    let mut edited = store.load(EventType::EventStat).unwrap();
    for (x, y) in [(90, 0), (119, 0), (119, 89)] {
        edited.add_point(RoiSlot::Roi2, x, y);
    }
    store.save(&edited).unwrap();
    surface.set_mode(AppMode::Streaming).unwrap();

    let Tick::Published { sequence } = orch.tick().unwrap() else {
        panic!("expected a published frame");
    };
    let reader = SqliteFrameLog::open_existing(db, "camera:0").unwrap();
    let latest = reader.latest().unwrap().unwrap();
    assert_eq!(latest.sequence, sequence);
    assert_eq!(
        latest.metadata,
        r#"{"ROI 1":2,"ROI 2":0,"ROI 3":0,"ROI 4":0,"ROI 5":0}"#
    );
    assert_eq!(orch.context().classifier().config().active_regions().count(), 2);

    // switching to stranger alerts counts only the person
    surface.set_event_type(EventType::AlertStranger).unwrap();
    orch.tick().unwrap();
    let latest = reader.latest().unwrap().unwrap();
    assert!(latest.metadata.starts_with(r#"{"ROI 1":1,"#));
    assert_eq!(orch.context().display_key(), "AlertStranger");

    let summary = orch.run(&ShutdownSignal::new()).unwrap();
    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.frames_captured, 6);
    assert_eq!(summary.frames_published, 6);
    assert_eq!(summary.configuring_ticks, 1);
    assert_eq!(summary.reloads, 2);

    // bootstrap record plus six published, capped at three
    assert_eq!(reader.len().unwrap(), 3);
    let sequences: Vec<u64> = reader.records().unwrap().iter().map(|r| r.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn missing_regions_stop_the_producer_at_startup() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("evento.db");
    let db = db.to_str().unwrap();

    let mut control = SqliteControlPlane::open(db).unwrap();
    let mut log = SqliteFrameLog::open(db, "camera:0", 10).unwrap();
    bootstrap(&mut control, &mut log, 85).unwrap();

    let store = RoiConfigStore::new(dir.path().join("config"));
    let err = PipelineContext::new(Box::new(control), store, None)
        .err()
        .expect("context must not start without regions");
    assert!(err.to_string().contains("EventStat"));
}
