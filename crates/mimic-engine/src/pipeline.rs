//! Per-message control flow: append, decide, generate, repair, dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use mimic_core::chat::ChatClient;
use mimic_core::ids::{ChannelId, UserId};
use mimic_core::message::Message;
use mimic_core::persona::PersonaProfile;
use mimic_core::provider::GenerateOptions;
use mimic_core::response::{FinalResponse, GateDecision, ResponseMode};
use mimic_core::status::RuntimeStatus;
use mimic_telemetry::{
    PipelineMetrics, MESSAGES_RECEIVED, RESPONSES_DISPATCHED, RESPONSES_SUPPRESSED,
};

use crate::aliases::PersonaAliases;
use crate::clock::Clock;
use crate::commands::{AdminCommand, CommandPolicy, StatusReport};
use crate::context_window::ContextWindow;
use crate::error::EngineError;
use crate::gate::{GateInput, ResponseGate};
use crate::orchestrator::{Completion, CompletionOrchestrator, NoResponse};
use crate::prompt::PromptBuilder;
use crate::random::RandomSource;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::style::{Limits, StyleValidator, Validated};

const SUPPRESSED_RATE_LIMITED: &str = "rate_limited";

/// Behaviour switches that are not persona tunables.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub admin_prefix: String,
    /// Extra command issuers; the persona identity is always allowed.
    pub admin_ids: Vec<UserId>,
    pub typing_indicator: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            admin_prefix: "!py".into(),
            admin_ids: Vec::new(),
            typing_indicator: true,
        }
    }
}

/// Collaborators the engine drives but does not own the lifecycle of.
pub struct EngineDeps {
    pub chat: Arc<dyn ChatClient>,
    pub completions: CompletionOrchestrator,
    pub random: Arc<dyn RandomSource>,
    pub clock: Arc<dyn Clock>,
    pub status: Arc<RuntimeStatus>,
    pub metrics: Arc<PipelineMetrics>,
    /// Shared with the orchestrator; once cancelled no new work starts.
    pub cancel: CancellationToken,
}

/// What happened to one inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Handled {
    /// Bot-authored, blank, a non-admin command, or arrived after shutdown.
    Ignored,
    Command(AdminCommand),
    /// Recorded in context; the gate decided not to answer.
    Observed(GateDecision),
    /// Gate chose to answer but the cooldown blocked it at arrival.
    RateLimited(GateDecision),
    /// A response task was started.
    Responding(GateDecision),
}

struct ResponseJob {
    channel_id: ChannelId,
    trigger: Option<Message>,
    /// The history the gate ruled on; later arrivals stay out of the prompt.
    snapshot: Vec<Message>,
    decision: GateDecision,
}

pub struct Engine {
    profile: Arc<PersonaProfile>,
    context: ContextWindow,
    limiter: RateLimiter,
    gate: ResponseGate,
    prompts: PromptBuilder,
    validator: StyleValidator,
    completions: CompletionOrchestrator,
    options: GenerateOptions,
    commands: CommandPolicy,
    typing_indicator: bool,
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
    status: Arc<RuntimeStatus>,
    metrics: Arc<PipelineMetrics>,
    dispatch_locks: DashMap<ChannelId, Arc<tokio::sync::Mutex<()>>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        profile: Arc<PersonaProfile>,
        config: EngineConfig,
        deps: EngineDeps,
    ) -> Result<Self, EngineError> {
        let tunables = &profile.tunables;
        if tunables.max_tokens == 0 {
            return Err(EngineError::InvalidTunable("max_tokens must be at least 1".into()));
        }
        let mut admins = vec![profile.identity.id.clone()];
        admins.extend(config.admin_ids);

        Ok(Self {
            context: ContextWindow::new(tunables.context_window_size),
            limiter: RateLimiter::new(RateLimitConfig::from_tunables(tunables)),
            gate: ResponseGate::new(tunables.clone(), deps.random)?,
            prompts: PromptBuilder::new(&profile)?,
            validator: StyleValidator::new(
                &profile.lexicon,
                Limits {
                    max_words: tunables.max_words,
                    max_chars: tunables.max_chars,
                },
            )?,
            completions: deps.completions,
            options: GenerateOptions {
                max_tokens: tunables.max_tokens,
                temperature: tunables.temperature,
            },
            commands: CommandPolicy::new(config.admin_prefix, admins),
            typing_indicator: config.typing_indicator,
            chat: deps.chat,
            clock: deps.clock,
            status: deps.status,
            metrics: deps.metrics,
            dispatch_locks: DashMap::new(),
            tasks: TaskTracker::new(),
            cancel: deps.cancel,
            profile,
        })
    }

    pub fn context(&self) -> &ContextWindow {
        &self.context
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn status(&self) -> &Arc<RuntimeStatus> {
        &self.status
    }

    fn aliases(&self) -> PersonaAliases {
        PersonaAliases::resolve(&self.profile.identity, self.status.account().as_ref())
    }

    /// Process one inbound message. Returns once the message is in the
    /// context window and the gate has ruled; generation runs in a
    /// background task.
    #[instrument(skip_all, fields(channel_id = %message.channel_id, message_id = %message.id))]
    pub async fn handle_message(self: &Arc<Self>, message: Message) -> Handled {
        if self.cancel.is_cancelled() || message.author_is_bot || message.content.trim().is_empty() {
            return Handled::Ignored;
        }
        if self
            .status
            .account()
            .is_some_and(|account| account.id == message.author_id)
        {
            // Our own bot account echoing back through the gateway.
            return Handled::Ignored;
        }
        self.metrics.record_received();

        if let Some(command) = AdminCommand::parse(&self.commands.prefix, &message.content) {
            if !self.commands.is_admin(&message.author_id) {
                debug!(author_id = %message.author_id, "ignoring command from non-admin");
                return Handled::Ignored;
            }
            self.run_command(&message.channel_id, &command).await;
            return Handled::Command(command);
        }

        let now = self.clock.now();
        let aliases = self.aliases();
        let channel_id = message.channel_id.clone();
        self.context.append(message.clone());
        let snapshot = self.context.snapshot(&channel_id);
        let decision = self.gate.evaluate(
            &message,
            &GateInput {
                snapshot: &snapshot,
                last_response_at: self.limiter.last_response_at(&channel_id),
                now,
                paused: self.status.is_paused(),
            },
            &aliases,
        );
        debug!(
            should_respond = decision.should_respond,
            mode = decision.mode.as_str(),
            trigger = decision.trigger.as_str(),
            probability = decision.probability,
            "gate evaluated"
        );
        if !decision.should_respond {
            return Handled::Observed(decision);
        }

        if !self.cooldown_allows(&channel_id, &message.author_id, decision.mode, now) {
            debug!(mode = decision.mode.as_str(), "cooldown active, dropping response");
            self.metrics.record_suppressed(SUPPRESSED_RATE_LIMITED);
            return Handled::RateLimited(decision);
        }

        // Initiation has no target message.
        let trigger = (decision.mode != ResponseMode::Initiation).then_some(message);
        self.spawn_response(ResponseJob {
            channel_id,
            trigger,
            snapshot,
            decision: decision.clone(),
        });
        Handled::Responding(decision)
    }

    /// Offer every known channel the chance to initiate. Returns the
    /// channels a response task was started for.
    #[instrument(skip_all)]
    pub fn run_idle_sweep(self: &Arc<Self>) -> Vec<ChannelId> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }
        let now = self.clock.now();
        let paused = self.status.is_paused();
        let mut started = Vec::new();
        for channel_id in self.context.channels() {
            let snapshot = self.context.snapshot(&channel_id);
            let decision = self.gate.evaluate_initiation(&GateInput {
                snapshot: &snapshot,
                last_response_at: self.limiter.last_response_at(&channel_id),
                now,
                paused,
            });
            if !decision.should_respond
                || !self.limiter.allow(&channel_id, decision.mode, now)
            {
                continue;
            }
            info!(channel_id = %channel_id, "initiating into idle channel");
            self.spawn_response(ResponseJob {
                channel_id: channel_id.clone(),
                trigger: None,
                snapshot,
                decision,
            });
            started.push(channel_id);
        }
        started
    }

    /// Run [`run_idle_sweep`](Self::run_idle_sweep) on a fixed period until shutdown.
    pub fn spawn_idle_sweep(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = engine.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = engine.run_idle_sweep();
                    }
                }
            }
        })
    }

    /// Wait for every in-flight response task to finish.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Stop accepting work, abandon pending completions, and wait for
    /// response tasks to wind down. Nothing partial is dispatched.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("engine stopped");
    }

    fn cooldown_allows(
        &self,
        channel_id: &ChannelId,
        author_id: &UserId,
        mode: ResponseMode,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        self.limiter.allow(channel_id, mode, now) && self.limiter.allow_user(author_id, mode, now)
    }

    fn spawn_response(self: &Arc<Self>, job: ResponseJob) {
        let engine = Arc::clone(self);
        let _ = self.tasks.spawn(async move { engine.respond(job).await });
    }

    #[instrument(skip_all, fields(
        channel_id = %job.channel_id,
        mode = job.decision.mode.as_str(),
        trigger = job.decision.trigger.as_str(),
    ))]
    async fn respond(&self, job: ResponseJob) {
        let ResponseJob {
            channel_id,
            trigger,
            snapshot,
            decision,
        } = job;

        if self.typing_indicator {
            if let Err(e) = self.chat.typing(&channel_id).await {
                debug!(error = %e, "typing indicator failed");
            }
        }

        let prompt = self.prompts.build(
            &self.profile,
            &snapshot,
            trigger.as_ref(),
            decision.mode,
            self.clock.now(),
        );

        let started = Instant::now();
        let completion = self.completions.complete(&prompt, &self.options).await;
        self.metrics
            .observe_completion_ms(started.elapsed().as_secs_f64() * 1000.0);
        let raw = match completion {
            Completion::Text(raw) => raw,
            Completion::NoResponse(reason) => {
                if matches!(reason, NoResponse::Provider(_) | NoResponse::Timeout) {
                    self.metrics.record_provider_failure(reason.as_str());
                }
                self.metrics.record_suppressed(reason.as_str());
                return;
            }
        };

        let aliases = self.aliases();
        let (text, had_mentions) = match self.validator.process(&raw, aliases.names()) {
            Validated::Accepted { text, had_mentions } => (text, had_mentions),
            Validated::Suppressed(reason) => {
                debug!(reason = reason.as_str(), "candidate suppressed");
                self.metrics.record_suppressed(reason.as_str());
                return;
            }
        };

        let reply_target = trigger
            .as_ref()
            .filter(|_| decision.mode.targets_message() || had_mentions)
            .map(|m| m.id.clone());
        let response = FinalResponse {
            text,
            reply_target_message_id: reply_target,
        };
        self.dispatch(
            &channel_id,
            trigger.as_ref().map(|m| &m.author_id),
            decision.mode,
            response,
        )
        .await;
    }

    /// Re-check the cooldown, deliver, then record. Serialised per channel
    /// so overlapping completions cannot both land inside the interval.
    async fn dispatch(
        &self,
        channel_id: &ChannelId,
        target_author: Option<&UserId>,
        mode: ResponseMode,
        response: FinalResponse,
    ) {
        let lock = Arc::clone(
            self.dispatch_locks
                .entry(channel_id.clone())
                .or_default()
                .value(),
        );
        let _guard = lock.lock().await;

        if self.cancel.is_cancelled() {
            self.metrics.record_suppressed("cancelled");
            return;
        }
        let now = self.clock.now();
        let allowed = self.limiter.allow(channel_id, mode, now)
            && target_author.map_or(true, |a| self.limiter.allow_user(a, mode, now));
        if !allowed {
            debug!("cooldown started while generating, dropping response");
            self.metrics.record_suppressed(SUPPRESSED_RATE_LIMITED);
            return;
        }

        let sent = match &response.reply_target_message_id {
            Some(target) => self.chat.reply(channel_id, target, &response.text).await,
            None => self.chat.send(channel_id, &response.text).await,
        };
        match sent {
            Ok(message_id) => {
                self.limiter.record(channel_id, target_author, now);
                let identity = &self.profile.identity;
                self.context.record_own(
                    channel_id,
                    message_id,
                    (&identity.id, &identity.name),
                    &response.text,
                    now,
                );
                self.metrics.record_dispatched(mode.as_str());
                info!(
                    threaded = response.reply_target_message_id.is_some(),
                    chars = response.text.len(),
                    "response dispatched"
                );
            }
            Err(e) => {
                warn!(error = %e, "dispatch failed, dropping response");
                self.metrics.record_dispatch_failure();
            }
        }
    }

    async fn run_command(&self, channel_id: &ChannelId, command: &AdminCommand) {
        let reply = match command {
            AdminCommand::Pause => {
                self.status.set_paused(true);
                info!("paused by admin");
                "paused, not responding until resumed".to_string()
            }
            AdminCommand::Resume => {
                self.status.set_paused(false);
                info!("resumed by admin");
                "resumed".to_string()
            }
            AdminCommand::Status => {
                let snap = self.metrics.snapshot();
                StatusReport {
                    paused: self.status.is_paused(),
                    channels: self.context.channels().len(),
                    received: snap.total(MESSAGES_RECEIVED),
                    dispatched: snap.total(RESPONSES_DISPATCHED),
                    suppressed: snap.total(RESPONSES_SUPPRESSED),
                }
                .render()
            }
            AdminCommand::Unknown(verb) => format!(
                "unknown command {verb:?}, try {0} pause, {0} resume or {0} status",
                self.commands.prefix
            ),
        };
        if let Err(e) = self.chat.send(channel_id, &reply).await {
            warn!(error = %e, "failed to answer admin command");
        }
    }
}
