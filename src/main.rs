use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mimic_core::persona::PersonaProfile;
use mimic_core::status::RuntimeStatus;
use mimic_discord::{DiscordRest, Gateway, GatewayConfig};
use mimic_engine::{CompletionOrchestrator, Engine, EngineConfig, EngineDeps, SystemClock, ThreadRandom};
use mimic_llm::{OpenRouterConfig, OpenRouterProvider, ReliableConfig};
use mimic_server::{HandlerState, ServerConfig};
use mimic_settings::{Credentials, LogFormat, MimicSettings};
use mimic_telemetry::{init_telemetry, LogOutput, TelemetryConfig};

const INBOUND_QUEUE: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "mimic", version, about = "Persona chat bot for Discord guild channels")]
struct Cli {
    /// Settings file (JSON, camelCase).
    #[arg(long, env = "MIMIC_SETTINGS")]
    settings: Option<PathBuf>,

    /// Persona prompt file; overrides `persona.promptPath`.
    #[arg(long)]
    persona: Option<PathBuf>,

    /// Overrides `server.healthPort`.
    #[arg(long)]
    health_port: Option<u16>,

    /// Load and validate configuration, then exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.settings.clone().unwrap_or_else(mimic_settings::settings_path);
    let mut settings = mimic_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    if let Some(path) = &cli.persona {
        settings.persona.prompt_path = path.display().to_string();
    }
    if let Some(port) = cli.health_port {
        settings.server.health_port = port;
    }
    settings.validate().context("invalid settings")?;

    let telemetry = init_telemetry(TelemetryConfig::from_strings(
        &settings.logging.level,
        &settings.logging.module_levels,
        match settings.logging.format {
            LogFormat::Json => LogOutput::Json,
            LogFormat::Pretty => LogOutput::Pretty,
        },
    ));

    let profile = load_profile(&settings)?;
    let credentials = Credentials::from_env();
    if cli.check_config {
        print_summary(&settings, &profile, credentials.is_ok());
        return credentials.map(|_| ()).context("missing credentials");
    }
    let credentials = credentials.context("missing credentials")?;

    tracing::info!(
        identity = %profile.identity.name,
        model = %settings.llm.model,
        "starting mimic"
    );

    let cancel = CancellationToken::new();
    let status = Arc::new(RuntimeStatus::new());
    let metrics = telemetry.metrics();

    let provider = OpenRouterProvider::new(OpenRouterConfig {
        base_url: settings.llm.base_url.clone(),
        request_timeout: Duration::from_secs(settings.llm.request_timeout_secs),
        ..OpenRouterConfig::new(credentials.llm_api_key.clone(), settings.llm.model.clone())
    })
    .context("building completion provider")?;
    let completions = CompletionOrchestrator::with_retries(
        provider,
        ReliableConfig {
            max_retries: settings.llm.max_retries,
            ..ReliableConfig::default()
        },
        Duration::from_secs(settings.llm.completion_timeout_secs),
        cancel.child_token(),
    );

    let chat = DiscordRest::new(credentials.bot_token.clone(), settings.discord.api_base.clone())
        .context("building Discord REST client")?;

    let engine = Arc::new(
        Engine::new(
            Arc::new(profile),
            EngineConfig {
                admin_prefix: settings.persona.admin_prefix.clone(),
                admin_ids: settings.persona.admins(),
                typing_indicator: settings.discord.typing_indicator,
            },
            EngineDeps {
                chat: Arc::new(chat),
                completions,
                random: Arc::new(ThreadRandom),
                clock: Arc::new(SystemClock),
                status: Arc::clone(&status),
                metrics: Arc::clone(&metrics),
                cancel: cancel.clone(),
            },
        )
        .context("building engine")?,
    );

    let server = mimic_server::start(
        ServerConfig {
            host: settings.server.host.clone(),
            port: settings.server.health_port,
        },
        Arc::new(HandlerState::new(
            Arc::clone(&status),
            Arc::clone(&metrics),
            settings.llm.model.clone(),
        )),
        cancel.clone(),
    )
    .await
    .context("starting health server")?;

    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let gateway = Gateway::new(
        GatewayConfig {
            url: settings.discord.gateway_url.clone(),
            max_reconnect_attempts: settings.discord.max_reconnect_attempts,
            ..GatewayConfig::new(credentials.bot_token.clone())
        },
        Arc::clone(&status),
        inbound_tx,
        cancel.clone(),
    );
    let mut gateway_task = tokio::spawn(async move { gateway.run().await });

    // Messages are handled one at a time so context order matches arrival.
    let consumer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                engine.handle_message(message).await;
            }
        })
    };
    let sweeper = engine.spawn_idle_sweep(Duration::from_secs(settings.server.idle_sweep_secs));

    tracing::info!(port = server.port, "mimic ready");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl+c")?;
            tracing::info!("shutdown requested");
            Ok(())
        }
        joined = &mut gateway_task => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("gateway stopped")),
            Err(e) => Err(anyhow::Error::new(e).context("gateway task panicked")),
        },
    };

    cancel.cancel();
    engine.shutdown().await;
    if !gateway_task.is_finished() {
        let _ = gateway_task.await;
    }
    let _ = consumer.await;
    let _ = sweeper.await;
    server.join().await;

    tracing::info!("shut down");
    outcome
}

fn print_summary(settings: &MimicSettings, profile: &PersonaProfile, credentials_ok: bool) {
    let t = &profile.tunables;
    println!("persona      {} ({})", profile.identity.name, profile.identity.id);
    println!("prompt       {} ({} chars)", settings.persona.prompt_path, profile.system_prompt.len());
    println!("model        {}", settings.llm.model);
    println!("tokens/temp  {} / {}", t.max_tokens, t.temperature);
    println!("interval     {}s (mentions bypass: {})", t.min_interval_secs, t.mention_bypasses_interval);
    println!("timezone     {}", t.timezone);
    println!("health port  {}", settings.server.health_port);
    println!("credentials  {}", if credentials_ok { "present" } else { "MISSING" });
}

fn load_profile(settings: &MimicSettings) -> Result<PersonaProfile> {
    let prompt_path = PathBuf::from(&settings.persona.prompt_path);
    let prompt = PersonaProfile::load_prompt(&prompt_path)
        .with_context(|| format!("loading persona prompt from {}", prompt_path.display()))?;
    Ok(PersonaProfile::new(
        settings.persona.identity(),
        prompt,
        settings.persona.lexicon.clone(),
        settings.persona.tunables.clone(),
    ))
}
