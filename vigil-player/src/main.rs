//! # Vigil Player
//!
//! Low-latency live H.264 stream viewer built on vigil-core.

mod app;
mod net;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use vigil_core::clock::SystemClock;
use vigil_core::config::PlayerConfig;
use vigil_core::decode::AccelPreference;
use vigil_core::openh264_decode::SoftwareDecodeService;
use vigil_core::pipeline::PlayerPipeline;
use vigil_core::render::HeadlessSurface;

const DEFAULT_LISTEN: &str = "127.0.0.1:7100";

#[derive(Debug)]
struct PlayerArgs {
    listen: String,
    config_path: Option<PathBuf>,
    hwaccel: Option<AccelPreference>,
    max_queued: Option<usize>,
    paint_queue: Option<usize>,
    stats_interval: Option<i64>,
    headless: bool,
    log_filter: Option<String>,
}

impl Default for PlayerArgs {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            config_path: None,
            hwaccel: None,
            max_queued: None,
            paint_queue: None,
            stats_interval: None,
            headless: false,
            log_filter: None,
        }
    }
}

fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let args = parse_args(&argv)?;

    let filter = args
        .log_filter
        .clone()
        .unwrap_or_else(|| "vigil=info,wgpu=warn".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("VIGIL Player v{}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    tracing::debug!(?config, "effective configuration");

    if args.headless {
        run_headless(&args, config)
    } else {
        run_windowed(&args, config)
    }
}

// ============================================================================
// Argument Parsing
// ============================================================================

fn parse_args(argv: &[String]) -> Result<PlayerArgs> {
    let mut parsed = PlayerArgs::default();
    let mut iter = argv.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--listen" => parsed.listen = take_value(&mut iter, "--listen")?.clone(),
            "--config" => {
                parsed.config_path = Some(PathBuf::from(take_value(&mut iter, "--config")?))
            }
            "--hwaccel" => {
                let raw = take_value(&mut iter, "--hwaccel")?;
                match raw.as_str() {
                    "0" | "1" | "2" => {
                        parsed.hwaccel = Some(AccelPreference::from_flag(parse_number(raw, "--hwaccel")?))
                    }
                    other => bail!("--hwaccel takes 0, 1 or 2, got {other}"),
                }
            }
            "--max-queued" => {
                let n = parse_number(take_value(&mut iter, "--max-queued")?, "--max-queued")?;
                if n == 0 {
                    bail!("--max-queued must be at least 1");
                }
                parsed.max_queued = Some(n);
            }
            "--paint-queue" => {
                let n = parse_number(take_value(&mut iter, "--paint-queue")?, "--paint-queue")?;
                if n == 0 {
                    bail!("--paint-queue must be at least 1");
                }
                parsed.paint_queue = Some(n);
            }
            "--stats-interval" => {
                parsed.stats_interval = Some(parse_number(
                    take_value(&mut iter, "--stats-interval")?,
                    "--stats-interval",
                )?)
            }
            "--headless" => parsed.headless = true,
            "--log" => parsed.log_filter = Some(take_value(&mut iter, "--log")?.clone()),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other} (try --help)"),
        }
    }
    Ok(parsed)
}

fn take_value<'a, I>(iter: &mut I, flag: &str) -> Result<&'a String>
where
    I: Iterator<Item = &'a String>,
{
    iter.next()
        .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
}

fn parse_number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("{flag} expects a number, got {raw}"))
}

fn print_usage() {
    println!(
        "vigil [OPTIONS]

  --listen ADDR        address to accept the feeder on (default {DEFAULT_LISTEN})
  --config PATH        JSON config file; CLI flags override it
  --hwaccel 0|1|2      acceleration: 0 none, 1 with fallback, 2 hardware only
  --max-queued N       scheduler queue depth before the clock jumps forward
  --paint-queue N      decoded frames held while a swap is in flight
  --stats-interval MS  minimum spacing between rs reports
  --headless           run without a window, counting paints
  --log FILTER         tracing filter (default vigil=info,wgpu=warn)"
    );
}

fn resolve_config(args: &PlayerArgs) -> Result<PlayerConfig> {
    let mut config = match &args.config_path {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if let Some(accel) = args.hwaccel {
        config.accel = accel;
    }
    if let Some(n) = args.max_queued {
        config.max_queued_frames = n;
    }
    if let Some(n) = args.paint_queue {
        config.max_paint_queue = n;
    }
    if let Some(ms) = args.stats_interval {
        config.stats_interval_ms = ms;
    }
    Ok(config)
}

// ============================================================================
// Run Modes
// ============================================================================

fn run_windowed(args: &PlayerArgs, config: PlayerConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let event_loop = winit::event_loop::EventLoop::new().context("creating event loop")?;
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Wait);

    let mut app = app::WindowedApp::new(runtime.handle().clone(), config, args.listen.clone());
    event_loop.run_app(&mut app).context("event loop")?;
    Ok(())
}

fn run_headless(args: &PlayerArgs, config: PlayerConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(async {
        let listener = TcpListener::bind(&args.listen)
            .await
            .with_context(|| format!("binding {}", args.listen))?;
        tracing::info!(addr = %args.listen, "listening for feeder (headless)");

        let service = Arc::new(SoftwareDecodeService::new());
        let surface = Arc::new(HeadlessSurface::new());
        let clock = Arc::new(SystemClock::new());
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (pipeline, events) = PlayerPipeline::new(config, service, surface, clock, host_tx);

        let transport = tokio::spawn(async move {
            if let Err(e) = net::serve(listener, events, host_rx).await {
                tracing::error!(error = %e, "transport failed");
            }
        });
        let outcome = tokio::select! {
            result = pipeline.run() => result.map_err(anyhow::Error::from),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                Ok(())
            }
        };
        transport.abort();
        outcome
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("vigil")
            .chain(parts.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults_without_flags() {
        let args = parse_args(&argv(&[])).expect("parse");
        assert_eq!(args.listen, DEFAULT_LISTEN);
        assert!(!args.headless);
        assert!(args.hwaccel.is_none());

        let config = resolve_config(&args).expect("config");
        assert_eq!(config, PlayerConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse_args(&argv(&[
            "--listen",
            "0.0.0.0:9000",
            "--hwaccel",
            "0",
            "--max-queued",
            "4",
            "--paint-queue",
            "16",
            "--stats-interval",
            "1000",
            "--headless",
            "--log",
            "vigil=trace",
        ]))
        .expect("parse");
        assert_eq!(args.listen, "0.0.0.0:9000");
        assert!(args.headless);
        assert_eq!(args.log_filter.as_deref(), Some("vigil=trace"));

        let config = resolve_config(&args).expect("config");
        assert_eq!(config.accel, AccelPreference::None);
        assert_eq!(config.max_queued_frames, 4);
        assert_eq!(config.max_paint_queue, 16);
        assert_eq!(config.stats_interval_ms, 1000);
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(parse_args(&argv(&["--hwaccel", "3"])).is_err());
        assert!(parse_args(&argv(&["--hwaccel"])).is_err());
        assert!(parse_args(&argv(&["--max-queued", "0"])).is_err());
        assert!(parse_args(&argv(&["--stats-interval", "soon"])).is_err());
        assert!(parse_args(&argv(&["--frobnicate"])).is_err());
    }
}
