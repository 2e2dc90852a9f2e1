mod update;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vole_core::paths::{SESSION_LOG, SETTINGS_FILE};
use vole_core::{RigConfig, SessionPaths, UserSettings};
use vole_hw::display::StimulusDisplay;
use vole_hw::sound::{make_noise, make_tone, CueBuffer, SoftCode};
use vole_hw::{Controller, NullDisplay, SimController, UdpDisplay};
use vole_session::{archive, order, pregen, store, SessionParams, SessionStore};
use vole_tasks::{run_passive, HabituationTask, PassiveOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Behavioral rig sequencer", long_about = None)]
struct Args {
    /// Path to the rig config
    #[arg(short, long, default_value = "vole.toml", env = "VOLE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a protocol session
    Run {
        #[arg(value_enum)]
        protocol: Protocol,
        /// Subject identifier
        #[arg(short, long)]
        subject: String,
        #[arg(long, default_value = "")]
        experimenter: String,
        #[arg(long, default_value = "")]
        project: String,
        /// Relabel the session as a mock after the run (passive only)
        #[arg(long)]
        mock: bool,
        /// Multiplier on replay delays (passive only)
        #[arg(long, default_value_t = 1.0)]
        time_scale: f64,
    },
    /// Show the latest session summary for a subject
    Info { subject: String },
    /// Show available rig versions, or check one out
    Update { version: Option<String> },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Protocol {
    Habituation,
    Passive,
}

impl Protocol {
    fn name(self) -> &'static str {
        match self {
            Protocol::Habituation => "habituation",
            Protocol::Passive => "passive",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Run {
            protocol,
            subject,
            experimenter,
            project,
            mock,
            time_scale,
        } => {
            let config = RigConfig::load_or_default(&args.config);
            let user = UserSettings {
                subjects: vec![subject],
                experimenter,
                project,
            };
            run_protocol(config, protocol, user, mock, time_scale).await
        }
        Command::Info { subject } => {
            let _guard = init_logging(None);
            let config = RigConfig::load_or_default(&args.config);
            show_info(&config, &subject)
        }
        Command::Update { version } => {
            let _guard = init_logging(None);
            let config = RigConfig::load_or_default(&args.config);
            let updater = update::Updater::new(std::env::current_dir()?);
            match version {
                None => updater.info().await,
                Some(v) => {
                    let home = dirs::home_dir().context("No home directory for backups")?;
                    updater
                        .checkout_version(&v, Some(config.protocol_root.as_path()), &home)
                        .await
                }
            }
        }
    }
}

/// Stderr logging always; a non-blocking file log in the session folder when
/// one exists.
fn init_logging(session_folder: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match session_folder {
        Some(folder) => {
            let appender = tracing_appender::rolling::never(folder, SESSION_LOG);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}

async fn run_protocol(
    config: RigConfig,
    protocol: Protocol,
    user: UserSettings,
    mock: bool,
    time_scale: f64,
) -> Result<()> {
    let subject = user.single_subject()?.to_string();
    let paths = SessionPaths::create(&config.data_root, &subject, protocol.name())?;
    let _guard = init_logging(Some(&paths.session_folder));
    info!(
        subject = %subject,
        protocol = protocol.name(),
        session = %paths.session_folder.display(),
        "starting session"
    );

    let mut params = SessionParams::derive(&config, &user, &paths)?;

    // Render the session cues and keep a copy with the raw data.
    let sound = &config.task.sound;
    let tone = make_tone(
        params.sound_sample_rate,
        sound.go_tone_freq_hz,
        sound.go_tone_secs,
        sound.go_tone_amplitude,
    );
    let noise = make_noise(
        params.sound_sample_rate,
        sound.white_noise_secs,
        sound.white_noise_amplitude,
    );
    tone.write_wav(&paths.raw_data_folder.join("_vole_goTone.raw.wav"))?;
    noise.write_wav(&paths.raw_data_folder.join("_vole_whiteNoise.raw.wav"))?;

    let mut controller = SimController::new();
    let softcode_rx = controller.softcode_channel();
    let sound_handler = spawn_softcode_handler(softcode_rx, tone, noise);

    let session_store = SessionStore::new(&paths);
    match protocol {
        Protocol::Habituation => {
            session_store.save_settings(&params)?;
            archive_protocol_code(&config, &paths, protocol)?;

            let mut task = HabituationTask::prepare(&mut controller, &params).await?;
            let outcome = task.run(&mut controller, &params, &session_store).await?;
            info!(
                trials = outcome.ntrials,
                water_delivered = outcome.water_delivered,
                "session complete"
            );
        }
        Protocol::Passive => {
            let previous = previous_settings(&paths);
            let (session_order, session_idx) = order::resume_session_order(previous.as_ref());
            let session_num = session_order[session_idx];
            params.session_order = Some(session_order);
            params.session_idx = Some(session_idx);
            info!(session_num, "replaying pregenerated session");

            session_store.save_settings(&params)?;
            archive_protocol_code(&config, &paths, protocol)?;

            let schedule = pregen::load_passive_schedule(&config.pregen_root, session_num)?;
            let pcs = pregen::load_passive_pcs(&config.pregen_root, session_num)?;
            let display: Box<dyn StimulusDisplay> = if config.task.use_visual_stimulus {
                Box::new(UdpDisplay::connect(&config.display.host, config.display.port).await?)
            } else {
                Box::new(NullDisplay::new())
            };
            let opts = PassiveOptions {
                time_scale,
                is_mock: mock,
                corresponding_ephys_settings: None,
            };
            let outcome = run_passive(
                &mut controller,
                display.as_ref(),
                &schedule,
                &pcs,
                &params,
                &opts,
            )
            .await?;
            info!(
                replayed = outcome.replayed,
                valves = outcome.valves,
                tones = outcome.tones,
                noises = outcome.noises,
                gabors = outcome.gabors,
                "replay complete"
            );
        }
    }

    controller.close().await?;
    drop(controller);
    let _ = sound_handler.join();
    Ok(())
}

/// Settings document of the session the adaptive rules drew on, if any.
fn previous_settings(paths: &SessionPaths) -> Option<serde_json::Value> {
    let settings_file = paths
        .previous_data_file
        .as_ref()?
        .parent()?
        .join(SETTINGS_FILE);
    match store::load_settings(&settings_file) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("previous session has no readable settings: {e:#}");
            None
        }
    }
}

fn archive_protocol_code(config: &RigConfig, paths: &SessionPaths, protocol: Protocol) -> Result<()> {
    let source = config.protocol_root.join(protocol.name());
    if !source.is_dir() {
        warn!(
            "protocol code not found at {}, skipping archive",
            source.display()
        );
        return Ok(());
    }
    archive::archive_code(&paths.raw_data_folder, &[source], &paths.code_archive)?;
    Ok(())
}

/// Softcodes arrive from the controller mid-state-machine; playback (when
/// compiled in) must not block the trial loop, so the handler gets its own
/// thread.
fn spawn_softcode_handler(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<u8>,
    tone: CueBuffer,
    noise: CueBuffer,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        tracing::debug!(
            tone_secs = tone.duration_secs(),
            noise_secs = noise.duration_secs(),
            "softcode handler ready"
        );
        #[cfg(feature = "playback")]
        let player = match vole_hw::sound::SoundPlayer::try_new() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("soft sound unavailable: {e:#}");
                None
            }
        };
        while let Some(code) = rx.blocking_recv() {
            match SoftCode::from_code(code) {
                Some(SoftCode::GoTone) => {
                    info!("softcode: go tone");
                    #[cfg(feature = "playback")]
                    if let Some(p) = &player {
                        p.play(&tone);
                    }
                }
                Some(SoftCode::WhiteNoise) => {
                    info!("softcode: white noise");
                    #[cfg(feature = "playback")]
                    if let Some(p) = &player {
                        p.play(&noise);
                    }
                }
                Some(SoftCode::StopSound) => {
                    info!("softcode: stop sound");
                    #[cfg(feature = "playback")]
                    if let Some(p) = &player {
                        p.stop();
                    }
                }
                None => warn!("unknown softcode {code}"),
            }
        }
    })
}

fn show_info(config: &RigConfig, subject: &str) -> Result<()> {
    let Some(data_file) = SessionPaths::latest_data_file(&config.data_root, subject) else {
        println!("No sessions found for {subject}");
        return Ok(());
    };
    let Some(last) = store::load_last_trial(&data_file)? else {
        println!("Latest session recorded no trials ({})", data_file.display());
        return Ok(());
    };
    println!("Latest session for {subject}: {}", data_file.display());
    println!("  trials:          {}", last.trial_num);
    println!("  water delivered: {:.1} ul", last.water_delivered);
    println!("  reward amount:   {:.2} ul", last.reward_amount);
    println!("  stim gain:       {:.1}", last.stim_gain);
    Ok(())
}
