// ABOUTME: Process entry point: config, logging, module registration, and the
// ABOUTME: message router over all configured service adapters.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use quorum::adapters::HttpAdapter;
use quorum::config::Config;
use quorum::dispatcher::Dispatcher;
use quorum::modules::ControlsModule;
use quorum::registry::ModuleRegistry;
use quorum::router::MessageRouter;
use quorum::runtime::RuntimeContext;
use quorum::selftest::session::PlannedCase;
use quorum::selftest::{SelfTestModule, SelfTestSettings};
use quorum_core::{ChatModule, ServiceAdapter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "quorum", about = "Multi-service chat assistant")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "Panic in quorum task");
    }));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quorum=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    tracing::info!(
        config = %args.config.display(),
        modules = ?config.modules.enabled,
        "Starting quorum"
    );

    if let Some(listen) = &config.metrics.listen {
        let addr: std::net::SocketAddr = listen
            .parse()
            .with_context(|| format!("metrics.listen is not a socket address: {}", listen))?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        tracing::info!(listen = %listen, "Metrics exporter listening");
    }

    let runtime = Arc::new(RuntimeContext::new());
    let registry = build_registry(&config, &runtime)?;
    registry.validate_test_cases()?;

    let mut adapters: Vec<Arc<dyn ServiceAdapter>> = Vec::new();
    if let Some(listen) = &config.http.listen {
        let adapter = Arc::new(HttpAdapter::new(listen.clone(), config.http.bot_user_id.clone()));
        tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move {
                if let Err(e) = adapter.serve().await {
                    tracing::error!(error = %e, "HTTP adapter exited");
                }
            }
        });
        adapters.push(adapter);
    }
    anyhow::ensure!(
        !adapters.is_empty(),
        "no service adapters configured (set http.listen or QUORUM_HTTP_LISTEN)"
    );

    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::clone(&runtime),
        config.dispatch.evaluation_timeout(),
    );
    let router = Arc::new(MessageRouter::new(
        dispatcher,
        runtime,
        config.bot.error_channel_id.clone(),
    ));
    router.run(adapters).await
}

/// Instantiate and register the enabled modules in configured order.
///
/// The self-test harness is built last so it can carry the test cases of
/// every other module, but it is registered at its configured position, which
/// is what carries the arbitration tie-break.
fn build_registry(config: &Config, runtime: &Arc<RuntimeContext>) -> Result<ModuleRegistry> {
    let enabled = &config.modules.enabled;
    let operator_ids = config.operator_ids_set();

    let mut built: Vec<Option<Arc<dyn ChatModule>>> = Vec::with_capacity(enabled.len());
    let mut selftest_slot = None;
    let mut plan: Vec<PlannedCase> = Vec::new();

    for name in enabled {
        match name.as_str() {
            "controls" => {
                let module: Arc<dyn ChatModule> = Arc::new(ControlsModule::new(
                    Arc::clone(runtime),
                    config.bot.control_channel_id.clone(),
                    operator_ids.clone(),
                    enabled.clone(),
                ));
                collect_cases(&module, &mut plan);
                built.push(Some(module));
            }
            "selftest" => {
                selftest_slot = Some(built.len());
                built.push(None);
            }
            other => anyhow::bail!("modules.enabled lists unknown module '{}'", other),
        }
    }

    if let Some(slot) = selftest_slot {
        let settings = SelfTestSettings {
            control_channel_id: config.bot.control_channel_id.clone(),
            operator_ids,
            settle: config.selftest.settle(),
            run_ceiling: config.selftest.run_ceiling(),
        };
        built[slot] = Some(Arc::new(SelfTestModule::new(
            Arc::clone(runtime),
            settings,
            plan,
        )));
    }

    let mut registry = ModuleRegistry::new();
    for module in built.into_iter().flatten() {
        registry.register(module)?;
    }
    Ok(registry)
}

/// Collect a module's declared cases into the run plan. A module declaring
/// none contributes one auto-failing placeholder so its silence is visible
/// in every report.
fn collect_cases(module: &Arc<dyn ChatModule>, plan: &mut Vec<PlannedCase>) {
    let cases = module.test_cases();
    if cases.is_empty() {
        plan.push(PlannedCase::failing_placeholder(module.name()));
        return;
    }
    for case in cases {
        plan.push(PlannedCase {
            module: module.name().to_string(),
            case,
        });
    }
}
