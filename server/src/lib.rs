//! Server-authoritative networking core for a persistent multiplayer world.
//!
//! C1–C10 live as sibling modules composed behind [`context::ServerContext`] (C9); this
//! crate root wires process-level config (`Args`), logging, the executor tasks
//! (tick loops, auto-save, session cleanup, diagnostics), and the `wtransport`
//! listener together.

pub mod authority;
pub mod conflict;
pub mod context;
pub mod diagnostics;
pub mod events;
pub mod registry;
pub mod replication;
pub mod save;
pub mod session;
pub mod tick;
pub mod transport;
pub mod trust;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use color_eyre::Result;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::context::ServerContext;
use crate::events::CoreEvent;

const AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(60);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const DIAGNOSTICS_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Process-level configuration. Spec-pinned constants (tick rates, trust
/// thresholds, bucket capacities) stay as module `const`s; only the handful of values
/// an operator would plausibly want to override at launch are exposed here.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
	/// Subject alternative names for the self-signed WebTransport certificate.
	#[clap(long, required = true)]
	pub subject_alt_names: Vec<String>,

	/// Port to bind the WebTransport listener on. Defaults to an OS-assigned port.
	#[clap(long)]
	pub port: Option<u16>,

	/// Directory player and world saves are persisted under.
	#[clap(long, default_value = "./saves")]
	pub save_path: PathBuf,

	/// Directory the rotating diagnostics JSONL log is written under.
	#[clap(long, default_value = "./logs")]
	pub log_path: PathBuf,
}

fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

pub async fn main(args: Args) -> Result<()> {
	color_eyre::install()?;

	let env_filter =
		EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();
	tracing_subscriber::fmt().with_target(true).with_level(true).with_env_filter(env_filter).init();

	let (ctx, mut events) = ServerContext::new(args.save_path.clone());
	let ctx = Arc::new(ctx);

	tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			log_event(event);
		}
	});

	let log_path = args.log_path.clone();
	tokio::try_join! {
		transport::launch(args, ctx.clone()),
		main_tick_task(ctx.clone()),
		combat_tick_task(ctx.clone()),
		auto_save_task(ctx.clone()),
		session_sweep_task(ctx.clone()),
		diagnostics_flush_task(ctx, log_path),
	}?;
	Ok(())
}

fn log_event(event: CoreEvent) {
	match event {
		CoreEvent::ActionRejected { player, reason } => {
			info!(%player, %reason, "action rejected");
		}
		CoreEvent::SaveError { player, message } => {
			warn!(?player, message, "save error");
		}
		CoreEvent::PlayerShouldBeKicked { player } => warn!(%player, "player should be kicked"),
		CoreEvent::PlayerShouldBeBanned { player } => warn!(%player, "player should be banned"),
		CoreEvent::HeartbeatTimeout { player } => warn!(%player, "heartbeat timeout"),
		CoreEvent::AiTakeover { player } => info!(%player, "ai took over"),
		CoreEvent::PlayerReconnected { player, disconnect_duration_ms } => {
			info!(%player, disconnect_duration_ms, "player reconnected");
		}
		CoreEvent::SessionPreserved { player } => info!(%player, "session preserved"),
		CoreEvent::ResyncRequested { packet } => {
			info!(player = %packet.player, reason = ?packet.reason, "resync requested");
		}
		other => tracing::debug!(?other, "core event"),
	}
}

async fn main_tick_task(ctx: Arc<ServerContext>) -> Result<()> {
	let mut interval = tokio::time::interval(tick::MAIN_TICK_RATE);
	loop {
		interval.tick().await;
		let now = now_ms();
		let snapshot = ctx.tick.run_main_tick(now);
		ctx.diagnostics.log_tick(snapshot.id, now, snapshot.delta_time_ms);
	}
}

async fn combat_tick_task(ctx: Arc<ServerContext>) -> Result<()> {
	let mut interval = tokio::time::interval(tick::COMBAT_TICK_RATE);
	loop {
		interval.tick().await;
		ctx.tick.run_combat_tick(now_ms());
	}
}

async fn auto_save_task(ctx: Arc<ServerContext>) -> Result<()> {
	let mut interval = tokio::time::interval(AUTO_SAVE_INTERVAL);
	loop {
		interval.tick().await;
		let (saved, failed) = ctx.save.save_all_dirty(now_ms()).await;
		info!(saved, failed, "auto-save pass complete");
	}
}

async fn session_sweep_task(ctx: Arc<ServerContext>) -> Result<()> {
	let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
	loop {
		interval.tick().await;
		let now = tokio::time::Instant::now().into_std();
		ctx.session.sweep_timeouts(now);
		for expired in ctx.session.cleanup_expired(now) {
			info!(player = %expired, "preserved session expired");
		}
	}
}

/// Flushes newly recorded diagnostics as JSONL into `log_path/network_<timestamp>.jsonl`,
/// rotating to a fresh file once the current one crosses [`diagnostics::ROTATION_BYTES`].
async fn diagnostics_flush_task(ctx: Arc<ServerContext>, log_path: PathBuf) -> Result<()> {
	let mut interval = tokio::time::interval(DIAGNOSTICS_FLUSH_INTERVAL);
	let mut current: Option<(tokio::fs::File, u64)> = None;
	loop {
		interval.tick().await;
		let lines = ctx.diagnostics.drain_unflushed();
		if lines.is_empty() {
			continue;
		}

		let needs_rotation = match &current {
			Some((_, bytes)) => *bytes >= diagnostics::ROTATION_BYTES,
			None => true,
		};
		if needs_rotation {
			tokio::fs::create_dir_all(&log_path).await?;
			let name = format!("network_{}.jsonl", diagnostics::format_rotation_timestamp(now_ms()));
			let path = log_path.join(name);
			let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
			current = Some((file, 0));
		}

		let mut body = String::new();
		for line in &lines {
			body.push_str(line);
			body.push('\n');
		}
		let Some((file, bytes)) = current.as_mut() else { unreachable!() };
		if let Err(err) = file.write_all(body.as_bytes()).await {
			warn!(error = %err, "failed to write diagnostics log");
			continue;
		}
		*bytes += body.len() as u64;
	}
}
