//! Passive replay against the simulated controller and a null display.

use vole_core::{RigConfig, SessionPaths, UserSettings};
use vole_hw::{NullDisplay, SimController};
use vole_session::{store, GaborParams, PassiveSchedule, SessionParams, SessionStore, StimKind};
use vole_tasks::{run_passive, PassiveOptions};

fn fixture() -> (tempfile::TempDir, SessionParams) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RigConfig::default();
    config.data_root = dir.path().to_path_buf();
    let user = UserSettings {
        subjects: vec!["M001".to_string()],
        ..Default::default()
    };
    let paths = SessionPaths::create(&config.data_root, "M001", "passive").unwrap();
    let params = SessionParams::derive(&config, &user, &paths).unwrap();
    (dir, params)
}

fn schedule() -> (PassiveSchedule, Vec<GaborParams>) {
    let schedule = PassiveSchedule {
        delays: vec![0.1, 0.2, 0.1, 0.3, 0.1],
        ids: vec![
            StimKind::Valve,
            StimKind::Tone,
            StimKind::Noise,
            StimKind::Gabor,
            StimKind::Gabor,
        ],
    };
    let pcs = vec![
        GaborParams { position: 35.0, contrast: 1.0, phase: 0.0 },
        GaborParams { position: -35.0, contrast: 0.5, phase: 0.25 },
    ];
    (schedule, pcs)
}

fn instant() -> PassiveOptions {
    PassiveOptions {
        time_scale: 0.0,
        ..Default::default()
    }
}

#[tokio::test]
async fn replays_every_stimulus_kind() {
    let (_dir, params) = fixture();
    let (schedule, pcs) = schedule();
    let mut sim = SimController::new();
    let display = NullDisplay::new();

    let outcome = run_passive(&mut sim, &display, &schedule, &pcs, &params, &instant())
        .await
        .unwrap();

    assert_eq!(outcome.replayed, 5);
    assert_eq!(outcome.valves, 1);
    assert_eq!(outcome.tones, 1);
    assert_eq!(outcome.noises, 1);
    assert_eq!(outcome.gabors, 2);
    // Valve + tone + noise each ran a one-state machine.
    assert_eq!(sim.machines_run(), 3);
    // Each gabor: one parameter set, one show, one stop.
    assert_eq!(display.counts(), (2, 2, 0, 2));
}

#[tokio::test]
async fn completion_flags_are_dropped() {
    let (_dir, params) = fixture();
    let (schedule, pcs) = schedule();
    let mut sim = SimController::new();
    let display = NullDisplay::new();

    run_passive(&mut sim, &display, &schedule, &pcs, &params, &instant())
        .await
        .unwrap();

    assert!(params
        .paths
        .session_folder
        .join("passive_data_for_ephys.flag")
        .is_file());
    assert!(params.paths.session_folder.join("poop_count.flag").is_file());
}

#[tokio::test]
async fn mock_sessions_get_relabeled() {
    let (_dir, params) = fixture();
    let (schedule, pcs) = schedule();
    // The settings file must exist before it can be patched.
    SessionStore::new(&params.paths).save_settings(&params).unwrap();

    let mut sim = SimController::new();
    let display = NullDisplay::new();
    let opts = PassiveOptions {
        time_scale: 0.0,
        is_mock: true,
        corresponding_ephys_settings: None,
    };
    run_passive(&mut sim, &display, &schedule, &pcs, &params, &opts)
        .await
        .unwrap();

    let settings = store::load_settings(&params.paths.settings_file).unwrap();
    assert_eq!(settings["protocol"], "passive_mock");
}

#[tokio::test]
async fn too_few_gabor_parameters_is_an_error() {
    let (_dir, params) = fixture();
    let (schedule, _) = schedule();
    let mut sim = SimController::new();
    let display = NullDisplay::new();

    let err = run_passive(&mut sim, &display, &schedule, &[], &params, &instant())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("gabors"));
}
