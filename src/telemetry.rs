//! Process-wide logging and OpenTelemetry setup for ringquery binaries.
//!
//! Logs go through `tracing-subscriber` with an `EnvFilter` (so
//! `RUST_LOG`-style directives work), either as JSON lines or plain text.
//! When telemetry is enabled, SDK tracer and meter providers are installed
//! globally so the distributor instruments record into them.

use crate::config::parse_optional_bool;
use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SERVICE_NAMESPACE: &str = "ringquery";
const ATTR_RUN_ID: &str = "ringquery.run_id";

/// Log line encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "plain" => Ok(LogFormat::Text),
            other => Err(Error::Config(format!(
                "log format must be json or text, got '{other}'"
            ))),
        }
    }
}

/// Telemetry settings read from the environment.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub service_name: String,
    pub run_id: Option<String>,
    pub sampler_name: String,
    pub resource_attributes: Vec<KeyValue>,
    sampler: Sampler,
}

impl TelemetryConfig {
    /// Reads `RINGQUERY_TELEMETRY_ENABLED` (default on),
    /// `RINGQUERY_TELEMETRY_RUN_ID` and the standard `OTEL_SERVICE_NAME`,
    /// `OTEL_TRACES_SAMPLER[_ARG]` and `OTEL_RESOURCE_ATTRIBUTES`.
    pub fn from_env(default_service_name: &str) -> Result<Self> {
        let service_name = env_non_empty("OTEL_SERVICE_NAME")
            .unwrap_or_else(|| default_service_name.to_string());
        if service_name.trim().is_empty() {
            return Err(Error::Config("service name cannot be empty".to_string()));
        }

        let enabled = parse_optional_bool("RINGQUERY_TELEMETRY_ENABLED")?.unwrap_or(true);
        let run_id = env_non_empty("RINGQUERY_TELEMETRY_RUN_ID");

        let sampler_name = env_non_empty("OTEL_TRACES_SAMPLER")
            .unwrap_or_else(|| "parentbased_always_on".to_string());
        let sampler_arg = env_non_empty("OTEL_TRACES_SAMPLER_ARG");
        let sampler = parse_sampler(&sampler_name, sampler_arg.as_deref())?;

        let raw_attributes = env_non_empty("OTEL_RESOURCE_ATTRIBUTES").unwrap_or_default();
        let resource_attributes =
            resource_attributes(&raw_attributes, &service_name, run_id.as_deref())?;

        Ok(Self {
            enabled,
            service_name,
            run_id,
            sampler_name,
            resource_attributes,
            sampler,
        })
    }
}

/// Keeps the installed SDK providers alive; they are flushed on drop.
pub struct Telemetry {
    config: TelemetryConfig,
    providers: Option<(TracerProvider, SdkMeterProvider)>,
}

impl Telemetry {
    /// Install the global subscriber and, if enabled, the OpenTelemetry
    /// providers. `filter` accepts anything `EnvFilter` does, e.g. `info`
    /// or `ringquery=debug,tonic=warn`.
    pub fn init(default_service_name: &str, filter: &str, format: LogFormat) -> Result<Self> {
        let config = TelemetryConfig::from_env(default_service_name)?;
        let filter = EnvFilter::try_new(filter)
            .map_err(|e| Error::Config(format!("invalid log filter '{filter}': {e}")))?;

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true);
        let installed = match format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Text => builder.try_init(),
        };
        installed.map_err(|e| Error::Config(format!("failed to install log subscriber: {e}")))?;

        let providers = config.enabled.then(|| install_providers(&config));

        info!(
            service_name = %config.service_name,
            telemetry_enabled = config.enabled,
            traces_sampler = %config.sampler_name,
            run_id = %config.run_id.as_deref().unwrap_or("none"),
            "Telemetry initialized"
        );

        Ok(Self { config, providers })
    }

    pub fn run_id(&self) -> Option<&str> {
        self.config.run_id.as_deref()
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn is_enabled(&self) -> bool {
        self.providers.is_some()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some((tracer_provider, meter_provider)) = self.providers.take() {
            let _ = meter_provider.shutdown();
            let _ = tracer_provider.shutdown();
        }
    }
}

fn install_providers(config: &TelemetryConfig) -> (TracerProvider, SdkMeterProvider) {
    let resource = Resource::default().merge(&Resource::new(config.resource_attributes.clone()));

    let tracer_provider = TracerProvider::builder()
        .with_config(
            trace::Config::default()
                .with_sampler(config.sampler.clone())
                .with_resource(resource.clone()),
        )
        .build();
    let _ = global::set_tracer_provider(tracer_provider.clone());

    let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
    global::set_meter_provider(meter_provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    (tracer_provider, meter_provider)
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_sampler(name: &str, arg: Option<&str>) -> Result<Sampler> {
    let sampler = match name.trim().to_ascii_lowercase().as_str() {
        "always_on" => Sampler::AlwaysOn,
        "always_off" => Sampler::AlwaysOff,
        "traceidratio" => Sampler::TraceIdRatioBased(sampler_ratio(arg)?),
        "parentbased_always_on" => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
        "parentbased_always_off" => Sampler::ParentBased(Box::new(Sampler::AlwaysOff)),
        "parentbased_traceidratio" => {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(sampler_ratio(arg)?)))
        }
        other => {
            return Err(Error::Config(format!(
                "unsupported OTEL_TRACES_SAMPLER '{other}'"
            )))
        }
    };
    Ok(sampler)
}

fn sampler_ratio(arg: Option<&str>) -> Result<f64> {
    let raw = arg.ok_or_else(|| {
        Error::Config("ratio samplers need OTEL_TRACES_SAMPLER_ARG".to_string())
    })?;
    match raw.trim().parse::<f64>() {
        Ok(ratio) if (0.0..=1.0).contains(&ratio) => Ok(ratio),
        _ => Err(Error::Config(format!(
            "OTEL_TRACES_SAMPLER_ARG must be a number between 0 and 1, got '{raw}'"
        ))),
    }
}

/// Merge `key=value,...` pairs with the attributes ringquery always sets.
/// The service name always wins; the namespace only fills a gap.
fn resource_attributes(
    raw: &str,
    service_name: &str,
    run_id: Option<&str>,
) -> Result<Vec<KeyValue>> {
    let mut attrs = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            Error::Config(format!(
                "OTEL_RESOURCE_ATTRIBUTES entry '{entry}' is not key=value"
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(
                "OTEL_RESOURCE_ATTRIBUTES has an empty key".to_string(),
            ));
        }
        attrs.insert(key.to_string(), value.trim().to_string());
    }

    attrs.insert("service.name".to_string(), service_name.to_string());
    attrs
        .entry("service.namespace".to_string())
        .or_insert_with(|| SERVICE_NAMESPACE.to_string());
    if let Some(run_id) = run_id {
        attrs.insert(ATTR_RUN_ID.to_string(), run_id.to_string());
    }

    Ok(attrs.into_iter().map(|(k, v)| KeyValue::new(k, v)).collect())
}
