use anyhow::{anyhow, bail, Context};
use assaycam::platform::NativePlatform;
use assaycam::{
    smart_select, AssayCamConfig, CameraRole, CameraSession, OpenRequest, SessionEvent, StreamSlot,
};
use base64::Engine;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const USAGE: &str = "Usage: assaycam-cli <command> [args]

Commands:
  info                                  show crate version and host platform
  list-devices [--json]                 enumerate video inputs
  permission                            show camera permission state
  smart-select [--json]                 show the keyword-based role assignment
  probe <device_id>                     briefly open a device
  capture <device_id> [--out <file>]    save one JPEG still
  analyze [--face <id>] [--scan <id>] [--seconds <n>]
                                        run purity analysis until both tests are seen

Options:
  --config <file>                       configuration file (default assaycam.toml)";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    assaycam::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let config = match option_value(&args, "--config")? {
        Some(path) => AssayCamConfig::load_from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => AssayCamConfig::load_or_default(),
    };
    let session = CameraSession::from_config(Arc::new(NativePlatform::new()), config)?;

    let command = &args[1];
    match command.as_str() {
        "info" => {
            println!("{}", serde_json::to_string_pretty(&assaycam::get_info())?);
            Ok(())
        }
        "list-devices" => cmd_list_devices(&session, &args).await,
        "permission" => cmd_permission(&session).await,
        "smart-select" => cmd_smart_select(&session, &args).await,
        "probe" => cmd_probe(&session, &args).await,
        "capture" => cmd_capture(&session, &args).await,
        "analyze" => cmd_analyze(&session, &args).await,
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

/// Value following `flag`, if the flag is present
fn option_value(args: &[String], flag: &str) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => args
            .get(i + 1)
            .cloned()
            .map(Some)
            .ok_or_else(|| anyhow!("{} needs a value", flag)),
        None => Ok(None),
    }
}

fn positional(args: &[String], usage: &str) -> anyhow::Result<String> {
    match args.get(2) {
        Some(value) if !value.starts_with("--") => Ok(value.clone()),
        _ => bail!("Usage: assaycam-cli {}", usage),
    }
}

async fn cmd_list_devices(session: &CameraSession, args: &[String]) -> anyhow::Result<()> {
    let devices = session.initialize().await?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for d in devices {
            println!("{}: {}", d.device_id, d.display_label());
        }
    }
    Ok(())
}

async fn cmd_permission(session: &CameraSession) -> anyhow::Result<()> {
    let state = session.registry().check_permission().await;
    println!("{:?}", state);
    if state.needs_prompt() {
        println!("camera access will be requested on first use");
    }
    if let Some(error) = session.registry().last_error() {
        println!("last error: {}", error);
    }
    Ok(())
}

async fn cmd_smart_select(session: &CameraSession, args: &[String]) -> anyhow::Result<()> {
    let devices = session.initialize().await?;
    let selection = smart_select(&devices);
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&selection)?);
    } else {
        for role in CameraRole::ALL {
            let label = selection
                .get(role)
                .map(|d| format!("{} ({})", d.display_label(), d.device_id))
                .unwrap_or_else(|| "none".to_string());
            println!("{}: {}", role.describe(), label);
        }
    }
    Ok(())
}

async fn cmd_probe(session: &CameraSession, args: &[String]) -> anyhow::Result<()> {
    let device_id = positional(args, "probe <device_id>")?;
    session.initialize().await?;
    if session.registry().test_device(&device_id).await {
        println!("{}: ok", device_id);
        Ok(())
    } else {
        bail!("{}: could not be opened", device_id)
    }
}

async fn cmd_capture(session: &CameraSession, args: &[String]) -> anyhow::Result<()> {
    let device_id = positional(args, "capture <device_id> [--out <file>]")?;
    let out = option_value(args, "--out")?.unwrap_or_else(|| "capture.jpg".to_string());

    session.initialize().await?;
    session
        .open(StreamSlot::Primary, &OpenRequest::device(device_id.clone()))
        .await?;
    let capture = session.capture(StreamSlot::Primary);
    session.close(StreamSlot::Primary);
    let capture = capture?;

    let encoded = capture
        .data_uri
        .split_once(',')
        .map(|(_, body)| body)
        .ok_or_else(|| anyhow!("capture is not a data URI"))?;
    let jpeg = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    std::fs::write(&out, &jpeg).with_context(|| format!("writing {}", out))?;
    println!(
        "{}: {}x{} -> {} ({} bytes)",
        device_id,
        capture.width,
        capture.height,
        out,
        jpeg.len()
    );
    Ok(())
}

async fn cmd_analyze(session: &CameraSession, args: &[String]) -> anyhow::Result<()> {
    let seconds: u64 = option_value(args, "--seconds")?
        .map(|s| s.parse())
        .transpose()
        .context("--seconds must be a whole number")?
        .unwrap_or(120);

    session.initialize().await?;
    let registry = session.registry();
    if let Some(face) = option_value(args, "--face")? {
        registry.select_by_id(CameraRole::Face, &face)?;
    }
    if let Some(scan) = option_value(args, "--scan")? {
        registry.select_by_id(CameraRole::Scan, &scan)?;
    }
    if !registry.selection().is_complete() {
        bail!("both a face and a scan camera are needed; pass --face and --scan");
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = stop_flag.clone();
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))?;

    let mut events = session.subscribe();
    session.start_purity_analysis().await?;
    println!("Analyzing for up to {}s, Ctrl-C to stop", seconds);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while !stop_flag.load(Ordering::SeqCst) && Instant::now() < deadline {
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::Detection {
                    activity,
                    timestamp,
                } => println!("{} {}", timestamp.to_rfc3339(), activity.notice()),
                SessionEvent::AnalysisSkipped { reason } => log::debug!("skipped: {}", reason),
                _ => {}
            }
        }
        if session.detection_flags().all_complete() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    session.stop_purity_analysis();
    let flags = session.detection_flags();
    println!(
        "rubbing: {}, acid: {}",
        flags.rubbing_completed, flags.acid_completed
    );
    match session.purity_results() {
        Ok(results) => println!("{}", serde_json::to_string_pretty(&results)?),
        Err(e) => println!("{}", e.user_message()),
    }
    Ok(())
}
