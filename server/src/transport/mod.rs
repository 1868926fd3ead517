//! WebTransport listener — the one transport binding this core ships with. Accepts QUIC sessions, frames each
//! bidirectional stream as `Envelope` in / `Outbound` out, and dispatches inbound
//! messages into [`ServerContext`]'s validators.

mod certificate;

use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use color_eyre::eyre::Context;
use color_eyre::Result;
use core_common::error::WireError;
use core_common::ids::PlayerId;
use core_common::messages::{Envelope, Inbound, Outbound};
use core_common::Framed;
use futures::{SinkExt, StreamExt};
use tracing::{error, info, info_span, instrument, Instrument};
use wtransport::endpoint::IncomingSession;
use wtransport::ServerConfig;

use self::certificate::Certificate;
use crate::context::ServerContext;
use crate::Args;

type Server = wtransport::Endpoint<wtransport::endpoint::endpoint_side::Server>;
type Conn = Framed<wtransport::stream::BiStream, Envelope, Outbound>;

const CERT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24);

fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

pub async fn launch(args: Args, ctx: Arc<ServerContext>) -> Result<()> {
	let cert = Certificate::new(
		wtransport::Identity::self_signed(args.subject_alt_names.iter())
			.wrap_err("failed to create self signed certificate")?,
	);
	let server = Server::server(
		ServerConfig::builder()
			.with_bind_default(args.port.unwrap_or(0))
			.with_identity(cert.as_ref())
			.build(),
	)
	.wrap_err("failed to create wtransport server")?;

	let port = server.local_addr().expect("could not determine port").port();
	let svr_ctx = TransportCtx::new(TransportCtxInner { san: args.subject_alt_names.clone(), port, cert });

	{
		let inner = svr_ctx.0.read().expect("lock poisoned");
		info!("server url:\n{}", server_url(&inner));
	}

	let mut next_id = 0u64;
	let accept_fut = async {
		loop {
			let incoming = server.accept().await;
			let ctx = ctx.clone();
			let svr_ctx = svr_ctx.clone();
			next_id += 1;
			let id = next_id;
			tokio::spawn(
				async move {
					if let Err(err) = handle_connection(ctx, svr_ctx, incoming).await {
						error!("connection terminated with error: {err:?}");
					} else {
						info!("disconnected");
					}
				}
				.instrument(info_span!("connection", id)),
			);
		}
	};

	let refresh_fut = cert_refresh_task(&server, svr_ctx, args.port);
	let ((), ()): ((), ()) = tokio::try_join! {
		async { accept_fut.await; Ok(()) },
		refresh_fut,
	}?;
	Ok(())
}

#[instrument(name = "cert refresh task", skip(server, svr_ctx))]
async fn cert_refresh_task(server: &Server, svr_ctx: TransportCtx, port: Option<u16>) -> Result<()> {
	let mut interval = tokio::time::interval(CERT_REFRESH_INTERVAL);
	interval.tick().await;
	loop {
		interval.tick().await;
		info!("refreshing certs");
		let mut inner = svr_ctx.0.write().expect("poisoned");
		inner.cert = Certificate::self_signed(inner.san.iter())
			.expect("already validated the SAN, so this should never panic");
		server
			.reload_config(
				ServerConfig::builder()
					.with_bind_default(port.unwrap_or(0))
					.with_identity(inner.cert.as_ref())
					.build(),
				false,
			)
			.wrap_err("failed to reload server config")?;
		info!("new server url:\n{}", server_url(&inner));
	}
}

async fn handle_connection(
	ctx: Arc<ServerContext>,
	_svr_ctx: TransportCtx,
	incoming: IncomingSession,
) -> Result<()> {
	let session_request = incoming.await?;
	info!(authority = %session_request.authority(), path = %session_request.path(), "new session");
	let connection = session_request.accept().await?;
	let bi = wtransport::stream::BiStream::join(
		connection.accept_bi().await.wrap_err("expected client to open bi stream")?,
	);
	let mut framed: Conn = Framed::new(bi);

	let Some(login) = framed.next().await else {
		return Err(WireError::ConnectionClosed).wrap_err("no login received");
	};
	let login = login.map_err(WireError::Io).wrap_err("error receiving login envelope")?;
	let Inbound::Login { player, session_token } = login.message else {
		color_eyre::eyre::bail!("expected Login as the first message");
	};

	match ctx.reconnect_player(player.clone(), session_token.clone(), std::time::Instant::now(), now_ms()) {
		Ok(_) => info!(%player, "restored preserved session"),
		Err(crate::session::SessionError::Expired) => {
			framed
				.send(Outbound::Rejection { reason: core_common::messages::RejectionReason::Other("Session expired".into()) })
				.await?;
			ctx.register_player(player.clone(), session_token, now_ms()).await;
		}
		Err(crate::session::SessionError::NotFound) => {
			ctx.register_player(player.clone(), session_token, now_ms()).await;
		}
	};
	framed.send(Outbound::HandshakeAck).await?;

	while let Some(envelope) = framed.next().await {
		let envelope = envelope.map_err(WireError::Io).wrap_err("error receiving envelope")?;
		if let Inbound::Heartbeat { client_tick, client_time_ms } = envelope.message {
			let resync = ctx
				.handle_heartbeat(&player, client_tick, client_time_ms, std::time::Instant::now(), now_ms())
				.await;
			if let Some(packet) = resync {
				framed.send(Outbound::Resync(Box::new(packet))).await?;
				continue;
			}
		} else if let Err(reason) = dispatch(&ctx, &player, envelope.message, now_ms()) {
			framed.send(Outbound::Rejection { reason }).await?;
			continue;
		}
		let packet = ctx.get_state_updates_for_client(&player, now_ms());
		framed.send(Outbound::State(packet)).await?;
	}

	ctx.preserve_on_disconnect(&player, std::time::Instant::now(), now_ms()).await;
	Ok(())
}

/// Routes one decoded [`Inbound`] message into the appropriate [`ServerContext`]
/// validator. Message kinds the core doesn't interpret are forwarded untouched and
/// always accepted at this layer.
fn dispatch(
	ctx: &ServerContext,
	player: &PlayerId,
	message: Inbound,
	now_ms: u64,
) -> Result<(), core_common::messages::RejectionReason> {
	match message {
		Inbound::Position { entity, position, delta_time_ms } => {
			ctx.validate_position_update(player, entity, position, delta_time_ms, now_ms)?;
			Ok(())
		}
		Inbound::Combat { attacker, target, ranged } => {
			ctx.validate_combat_action(player, attacker, target, ranged, now_ms)?;
			Ok(())
		}
		Inbound::Inventory { action, item_id, quantity } => {
			ctx.validate_inventory_change(
				player,
				action,
				&item_id,
				quantity,
				core_common::entity::Vec3::ZERO,
				None,
				now_ms,
			)?;
			Ok(())
		}
		Inbound::Animation { entity, clip } => {
			ctx.validate_animation_update(player, entity, &clip, now_ms)?;
			Ok(())
		}
		Inbound::Ack { event_id } => {
			ctx.process_acknowledgment(event_id);
			Ok(())
		}
		// Login/Register/Health/spawn/AI-command/Forwarded kinds are either handled
		// once at connection setup (Login) or belong to higher-level systems this core
		// exposes hooks for but doesn't itself interpret further here. Heartbeat is
		// peeled off before dispatch is reached, since its handling is async.
		_ => Ok(()),
	}
}

fn server_url(inner: &TransportCtxInner) -> String {
	let encoded_cert_hash = &inner.cert.base64_hash;
	let subject_alt_name = inner.san.first().expect("should have at least 1 SAN");
	format!("https://{subject_alt_name}:{}/#{encoded_cert_hash}", inner.port)
}

struct TransportCtxInner {
	san: Vec<String>,
	port: u16,
	cert: Certificate,
}

#[derive(Clone)]
struct TransportCtx(Arc<RwLock<TransportCtxInner>>);

impl TransportCtx {
	fn new(inner: TransportCtxInner) -> Self {
		Self(Arc::new(RwLock::new(inner)))
	}
}
