//! leadlimpo-track: replays a script of tracker operations against a
//! simulated landing page and prints what the pixel and the data layer
//! received.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use leadlimpo_cache::{JsonFileStorage, SafeStorage, StorageTier};
use leadlimpo_core::event_bus::capture_pixel;
use leadlimpo_core::{ContextPatch, ContextSnapshot, DataLayerSink, Payload, PixelCall, TrackerConfig};
use leadlimpo_web_sdk::{
    LeadInput, LeadTracker, PageHost, RegistrationInput, StartedInput, StepAnswer,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_FILTER: &str = "leadlimpo_track=info,leadlimpo_web_sdk=info,leadlimpo_cache=info";

#[derive(Parser, Debug)]
#[command(name = "leadlimpo-track")]
#[command(about = "Replay lead-funnel tracking scripts against a simulated page")]
#[command(version)]
struct Cli {
    /// Page URL the tracker runs on (path and utm_* parameters matter)
    #[arg(long)]
    url: String,

    /// JSON array of script steps
    #[arg(long)]
    script: PathBuf,

    /// JSON file backing persistent storage, kept between runs
    #[arg(long)]
    store: Option<PathBuf>,

    /// Session id used when none is restored (random if omitted)
    #[arg(long)]
    session_id: Option<String>,

    /// Load the pixel only after this many milliseconds
    #[arg(long)]
    pixel_ready_after_ms: Option<u64>,

    /// Force debug logging on
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// TOML config file (environment variables still apply on top)
    #[arg(long, env = "LEADLIMPO_CONFIG")]
    config: Option<PathBuf>,
}

/// One scripted call of the public tracker surface.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
enum ScriptStep {
    Init,
    SetContext {
        #[serde(default)]
        args: Value,
    },
    SaveContact {
        #[serde(default)]
        args: Value,
    },
    SetDebugMode {
        enabled: bool,
    },
    TrackViewContent {
        #[serde(default)]
        args: Value,
    },
    TrackStarted {
        #[serde(default)]
        args: Value,
    },
    TrackStepAnswered {
        #[serde(default)]
        args: Value,
    },
    TrackLead {
        #[serde(default)]
        args: Value,
    },
    TrackCompleteRegistration {
        #[serde(default)]
        args: Value,
    },
    TrackCustomPixelEvent {
        #[serde(default)]
        name: String,
        #[serde(default)]
        params: Value,
    },
    PushCustomDataLayerEvent {
        #[serde(default)]
        record: Value,
    },
    ChatMessage {
        message: Value,
    },
    Sleep {
        ms: u64,
    },
}

#[derive(Debug, Serialize)]
struct Report {
    context: ContextSnapshot,
    pixel_calls: Vec<PixelCall>,
    data_layer: Vec<Payload>,
    pending_retries: usize,
}

fn object_or_empty(value: &Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

async fn run_step(tracker: &LeadTracker, step: ScriptStep) {
    match step {
        ScriptStep::Init => tracker.init(),
        ScriptStep::SetContext { args } => tracker.set_context_value(&args),
        ScriptStep::SaveContact { args } => tracker.save_contact_value(&args),
        ScriptStep::SetDebugMode { enabled } => tracker.set_debug_mode(enabled),
        ScriptStep::TrackViewContent { args } => {
            let extra = args.as_object();
            tracker.track_view_content(extra);
        }
        ScriptStep::TrackStarted { args } => {
            tracker.track_started(&StartedInput::from_value(&args));
        }
        ScriptStep::TrackStepAnswered { args } => {
            tracker.track_step_answered(&StepAnswer::from_value(&args));
        }
        ScriptStep::TrackLead { args } => {
            tracker.track_lead(&LeadInput::from_value(&args));
        }
        ScriptStep::TrackCompleteRegistration { args } => {
            tracker.track_complete_registration(&RegistrationInput::from_value(&args));
        }
        ScriptStep::TrackCustomPixelEvent { name, params } => {
            tracker.track_custom_pixel_event(&name, &object_or_empty(&params));
        }
        ScriptStep::PushCustomDataLayerEvent { record } => {
            tracker.push_custom_data_layer_event(&object_or_empty(&record));
        }
        ScriptStep::ChatMessage { message } => {
            tracker.receive_message(&message);
        }
        ScriptStep::Sleep { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = match &cli.config {
        Some(path) => TrackerConfig::load_from(Some(path.as_path()))
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TrackerConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            TrackerConfig::default()
        }),
    };

    let raw = std::fs::read_to_string(&cli.script)
        .with_context(|| format!("reading script {}", cli.script.display()))?;
    let steps: Vec<ScriptStep> =
        serde_json::from_str(&raw).with_context(|| format!("parsing script {}", cli.script.display()))?;

    let mut host = PageHost::parse(&cli.url)?;
    if let Some(path) = &cli.store {
        let storage = JsonFileStorage::open(path)?;
        host = host.with_persistent_storage(SafeStorage::new(StorageTier::Persistent, Arc::new(storage)));
    }
    let host = Arc::new(host);

    let tracker = LeadTracker::builder(Arc::clone(&host)).config(config).build()?;
    if cli.debug {
        tracker.set_debug_mode(true);
    }

    let pixel = capture_pixel();
    match cli.pixel_ready_after_ms {
        Some(ms) => {
            let host = Arc::clone(&host);
            let sink = pixel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                host.install_pixel(sink);
                info!(after_ms = ms, "pixel loaded");
            });
        }
        None => host.install_pixel(pixel.clone()),
    }

    info!(url = %cli.url, steps = steps.len(), "replaying script");

    let mut session_seeded = false;
    for step in steps {
        let is_init = step == ScriptStep::Init;
        run_step(&tracker, step).await;

        if is_init && !session_seeded {
            session_seeded = true;
            if tracker.get_context().session_id.is_none() {
                let id = cli
                    .session_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                tracker.set_context(&ContextPatch::session(id));
            }
        }
    }

    tracker.flush().await;

    let report = Report {
        context: tracker.get_context(),
        pixel_calls: pixel.calls(),
        data_layer: host.data_layer().map(|layer| layer.entries()).unwrap_or_default(),
        pending_retries: tracker.pending_retries(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
