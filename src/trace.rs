use std::env;

use anyhow::Result;
use opentelemetry::global;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

const SERVICE_NAME: &str = "disco";

/// Logs to stderr, spans are exported to jaeger too when `JAEGER_AGENT` is set.
pub fn init_tracing() -> Result<()> {
    let trace = match env::var("JAEGER_AGENT") {
        Err(_) => None,

        Ok(agent_addr) => {
            global::set_text_map_propagator(opentelemetry_jaeger::Propagator::new());

            let tracer = opentelemetry_jaeger::new_pipeline()
                .with_service_name(SERVICE_NAME)
                .with_agent_endpoint(agent_addr)
                .install_simple()?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
    };

    let stderr_subscriber = tracing_subscriber::fmt::layer().pretty().with_target(true);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = Registry::default()
        .with(env_filter)
        .with(trace)
        .with(stderr_subscriber);

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

pub fn stop_tracing() {
    global::shutdown_tracer_provider();
}
