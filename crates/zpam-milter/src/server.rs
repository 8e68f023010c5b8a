//! Accept loop and indymilter callback wiring (spec §4.8). One
//! `MilterServer` owns the listener and the `SessionRegistry`; it is
//! handed an already-started `zpam_filter::Engine` and runs until the
//! supplied shutdown future resolves.

use std::ffi::CString;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use indymilter::{
    Actions, Callbacks, Config as MilterWireConfig, Context, EomContext, IntoCString,
    NegotiateContext, ProtocolSteps, Status,
};
use tokio::net::{TcpListener, UnixListener};

use zpam_config::{ListenAddr, MilterConfig};
use zpam_filter::Engine;
use zpam_trc::EventType;
use zpam_types::action::Action;

use crate::session::{MilterSession, SessionGuard, SessionRegistry};

/// Builds the `indymilter::Actions` bitset the milter negotiates,
/// driven by the capability flags of spec §6 (add/change headers,
/// add/remove recipients, change body, change envelope-from,
/// quarantine).
fn requested_actions(config: &MilterConfig) -> Actions {
    let mut actions = Actions::empty();
    if config.can_add_headers {
        actions |= Actions::ADD_HEADER;
    }
    if config.can_change_headers {
        actions |= Actions::CHANGE_HEADER;
    }
    if config.can_add_rcpt {
        actions |= Actions::ADD_RCPT;
    }
    if config.can_remove_rcpt {
        actions |= Actions::DELETE_RCPT;
    }
    if config.can_change_body {
        actions |= Actions::REPLACE_BODY;
    }
    if config.can_change_from {
        actions |= Actions::CHANGE_FROM;
    }
    if config.can_quarantine {
        actions |= Actions::QUARANTINE;
    }
    actions
}

/// Builds the skip mask so the MTA omits events this deployment never
/// needs (spec §4.8: "Skippable states are advertised via a
/// negotiation mask so the MTA omits them").
fn requested_protocol_steps(config: &MilterConfig) -> ProtocolSteps {
    let mut steps = ProtocolSteps::empty();
    if config.skip_connect {
        steps |= ProtocolSteps::NO_CONNECT;
    }
    if config.skip_helo {
        steps |= ProtocolSteps::NO_HELO;
    }
    if config.skip_body {
        steps |= ProtocolSteps::NO_BODY;
    }
    steps
}

async fn on_negotiate(context: &mut NegotiateContext<MilterSession>, config: &MilterConfig) -> Status {
    context.requested_actions |= requested_actions(config);
    context.requested_protocol_steps |= requested_protocol_steps(config);
    Status::Continue
}

async fn on_connect(
    context: &mut Context<MilterSession>,
    address: Option<IpAddr>,
    registry: Arc<SessionRegistry>,
    read_timeout: Duration,
    body_cap: usize,
) -> Status {
    if !registry.accepting.load(std::sync::atomic::Ordering::SeqCst) {
        return Status::Tempfail;
    }
    let permit = match tokio::time::timeout(read_timeout, registry.concurrency.clone().acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        _ => {
            zpam_trc::warn!(EventType::ConcurrencyLimitReached);
            return Status::Tempfail;
        }
    };
    zpam_trc::event!(EventType::ConnectionStart);
    let mut session = MilterSession::new(SessionGuard::new(permit, registry.active.clone()), body_cap);
    session.client_ip = address;
    context.data = Some(session);
    Status::Continue
}

async fn on_helo(context: &mut Context<MilterSession>, helo: CString) -> Status {
    if let Some(session) = context.data.as_mut() {
        session.helo_name = helo.to_string_lossy().into_owned();
    }
    Status::Continue
}

async fn on_mail(context: &mut Context<MilterSession>, args: Vec<CString>) -> Status {
    let Some(session) = context.data.as_mut() else {
        return Status::Tempfail;
    };
    match args.into_iter().next() {
        Some(from) => {
            session.envelope_from = strip_angle_brackets(&from.to_string_lossy());
            Status::Continue
        }
        None => Status::Reject,
    }
}

async fn on_rcpt(context: &mut Context<MilterSession>, args: Vec<CString>) -> Status {
    let Some(session) = context.data.as_mut() else {
        return Status::Tempfail;
    };
    match args.into_iter().next() {
        Some(to) => {
            session.envelope_to.push(strip_angle_brackets(&to.to_string_lossy()));
            Status::Continue
        }
        None => Status::Reject,
    }
}

async fn on_header(context: &mut Context<MilterSession>, name: CString, value: CString) -> Status {
    let Some(session) = context.data.as_mut() else {
        return Status::Tempfail;
    };
    session.headers.push((
        name.to_string_lossy().into_owned(),
        value.to_string_lossy().into_owned(),
    ));
    Status::Continue
}

async fn on_eoh(_context: &mut Context<MilterSession>) -> Status {
    Status::Continue
}

async fn on_body(context: &mut Context<MilterSession>, data: bytes::Bytes) -> Status {
    let Some(session) = context.data.as_mut() else {
        return Status::Tempfail;
    };
    match session.body.push(&data) {
        Ok(()) => Status::Continue,
        Err(_) => {
            zpam_trc::warn!(EventType::ConcurrencyLimitReached);
            Status::Tempfail
        }
    }
}

async fn on_eom(
    context: &mut EomContext<MilterSession>,
    engine: Arc<Engine>,
    receive_timestamp: i64,
) -> Status {
    let Some(session) = context.data.as_mut() else {
        return Status::Tempfail;
    };

    let message = match session.build_message(receive_timestamp) {
        Ok(message) => message,
        Err(_) => return Status::Reject,
    };

    let result = engine.process(&message, receive_timestamp).await;
    zpam_trc::info!(EventType::ActionDecided, level = result.bundle.final_level);

    let outcome = match result.action {
        Action::Accept { annotations } => {
            if let Some(annotation) = annotations {
                let prefix = &engine.config().milter.header_prefix;
                let _ = context
                    .actions
                    .add_header(
                        format!("{prefix}Status").into_c_string(),
                        annotation.status.into_c_string(),
                    )
                    .await;
                let _ = context
                    .actions
                    .add_header(
                        format!("{prefix}Score").into_c_string(),
                        annotation.score_level.to_string().into_c_string(),
                    )
                    .await;
                let _ = context
                    .actions
                    .add_header(
                        format!("{prefix}Score-Raw").into_c_string(),
                        format!("{:.2}", annotation.score_raw).into_c_string(),
                    )
                    .await;
                let _ = context
                    .actions
                    .add_header(
                        format!("{prefix}Info").into_c_string(),
                        annotation.info.into_c_string(),
                    )
                    .await;
            }
            Status::Accept
        }
        Action::Quarantine { reason } => {
            if context.actions.quarantine(reason.into_c_string()).await.is_ok() {
                Status::Accept
            } else {
                Status::Accept
            }
        }
        Action::Reject { smtp_reply } => {
            apply_reject_reply(context, &smtp_reply).await;
            Status::Reject
        }
    };

    session.reset_for_next_message();
    outcome
}

async fn on_abort(context: &mut Context<MilterSession>) -> Status {
    if let Some(session) = context.data.as_mut() {
        session.reset_for_next_message();
    }
    Status::Continue
}

async fn on_close(_context: &mut Context<MilterSession>) -> Status {
    zpam_trc::event!(EventType::ConnectionEnd);
    Status::Continue
}

/// Applies the configured reject reply (e.g. `"550 5.7.1 Message
/// rejected as spam"`) as the SMTP status the MTA returns, splitting
/// it into the reply code, enhanced status code, and text the way
/// `smfi_setreply` expects.
async fn apply_reject_reply(context: &mut EomContext<MilterSession>, smtp_reply: &str) {
    let mut parts = smtp_reply.splitn(3, ' ');
    let code = parts.next().unwrap_or("550");
    let xcode = parts.next().unwrap_or("5.7.1");
    let message = parts.next().unwrap_or("Message rejected as spam");
    let _ = context
        .actions
        .set_reply(code.into_c_string(), xcode.into_c_string(), message.into_c_string())
        .await;
}

fn strip_angle_brackets(address: &str) -> String {
    address.trim_start_matches('<').trim_end_matches('>').to_string()
}

fn assemble_callbacks(
    engine: Arc<Engine>,
    registry: Arc<SessionRegistry>,
    config: Arc<MilterConfig>,
) -> Callbacks<MilterSession> {
    let negotiate_config = config.clone();
    let connect_registry = registry.clone();
    let read_timeout = Duration::from_millis(config.read_timeout_ms);
    let body_cap = config.body_buffer_cap_bytes;
    let eom_engine = engine;

    Callbacks::new()
        .on_negotiate(move |context, _, _| {
            let config = negotiate_config.clone();
            Box::pin(async move { on_negotiate(context, &config).await })
        })
        .on_connect(move |context, _hostname, address| {
            let registry = connect_registry.clone();
            Box::pin(on_connect(context, address, registry, read_timeout, body_cap))
        })
        .on_helo(|context, helo| Box::pin(on_helo(context, helo)))
        .on_mail(|context, args| Box::pin(on_mail(context, args)))
        .on_rcpt(|context, args| Box::pin(on_rcpt(context, args)))
        .on_header(|context, name, value| Box::pin(on_header(context, name, value)))
        .on_eoh(|context| Box::pin(on_eoh(context)))
        .on_body(|context, data| Box::pin(on_body(context, data)))
        .on_eom(move |context| {
            let engine = eom_engine.clone();
            let now = unix_timestamp_secs();
            Box::pin(on_eom(context, engine, now))
        })
        .on_abort(|context| Box::pin(on_abort(context)))
        .on_close(|context| Box::pin(on_close(context)))
}

/// Seconds since the epoch, used both as `Message::session.receive_timestamp`
/// and as the `now_unix` the C3 date-skew check compares `Date:` headers
/// against.
fn unix_timestamp_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Owns the listener and the live-session registry for one milter
/// deployment. `serve` runs the accept loop until `shutdown` resolves,
/// then waits up to `ShutdownGrace` for in-flight sessions before
/// returning (spec §4.8 "Graceful shutdown").
pub struct MilterServer {
    config: Arc<MilterConfig>,
    registry: Arc<SessionRegistry>,
}

impl MilterServer {
    pub fn new(config: MilterConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_concurrent));
        MilterServer {
            config: Arc::new(config),
            registry,
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Runs the accept loop. `shutdown` should resolve on SIGTERM/SIGINT;
    /// once it does, no new connections are accepted and in-flight
    /// sessions get `ShutdownGrace` to finish their current message
    /// before the listener is dropped.
    pub async fn serve(
        &self,
        engine: Arc<Engine>,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let callbacks = assemble_callbacks(engine, self.registry.clone(), self.config.clone());
        let wire_config = MilterWireConfig {
            actions: requested_actions(&self.config),
            protocol_steps: requested_protocol_steps(&self.config),
            ..MilterWireConfig::default()
        };

        let registry = self.registry.clone();
        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        let guarded_shutdown = async move {
            shutdown.await;
            zpam_trc::event!(EventType::ShutdownBegin);
            registry
                .accepting
                .store(false, std::sync::atomic::Ordering::SeqCst);
            wait_for_drain(&registry, grace).await;
            zpam_trc::event!(EventType::ShutdownComplete);
        };

        match &self.config.listen {
            ListenAddr::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await?;
                indymilter::run(listener, wire_config, callbacks, guarded_shutdown).await
            }
            ListenAddr::Unix { path } => {
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                indymilter::run(listener, wire_config, callbacks, guarded_shutdown).await
            }
        }
    }
}

/// Waits for every live session to drain, bounded by `grace` (spec
/// §4.8: "wait up to `ShutdownGrace` for them to complete their
/// current message, then force-close").
async fn wait_for_drain(registry: &SessionRegistry, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    while registry.active.load(std::sync::atomic::Ordering::SeqCst) > 0 {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
