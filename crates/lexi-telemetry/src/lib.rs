use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging subscriber.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "lexi_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: vec![("hyper".to_string(), Level::WARN)],
            json: false,
        }
    }
}

/// Returned by [`init_telemetry`]; keep it alive for the life of the process.
#[derive(Debug)]
pub struct TelemetryGuard {
    installed: bool,
    directives: String,
}

impl TelemetryGuard {
    /// False when another global subscriber was already set.
    pub fn installed(&self) -> bool {
        self.installed
    }

    /// Filter directives used when RUST_LOG is unset.
    pub fn directives(&self) -> &str {
        &self.directives
    }
}

/// Build the `EnvFilter` directive string for `config`.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let directives = filter_directives(&config);
    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter())
    });
    let pretty_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter())
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .is_ok();

    TelemetryGuard { installed, directives }
}
