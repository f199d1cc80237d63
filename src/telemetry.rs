//! # Telemetry handles and initializer seam.
//!
//! The supervisor treats telemetry as a black box: a [`TelemetryInit`] is
//! called once per invocation, before any service code runs, and returns the
//! [`Telemetry`] handles to expose through every [`ServiceContext`](crate::ServiceContext)
//! plus a [`ShutdownHook`] that is awaited once all services have stopped.
//!
//! ```text
//! Supervisor::run_group()
//!   ├─► TelemetryInit::init(&identities) ──► Err ─► RunError::Telemetry (nothing started)
//!   ├─► ... supervise services, ctx.telemetry() ...
//!   └─► ShutdownHook() ──► Err ─► logged only
//! ```
//!
//! [`SdkTelemetry`] (the default) builds `opentelemetry_sdk` tracer and meter
//! providers tagged with the service resource, propagates W3C trace context
//! and flushes both providers on shutdown. Exporters are attached with
//! [`SdkTelemetry::with_traces`] / [`SdkTelemetry::with_metrics`]; without
//! them the data is dropped and a warning is logged.
//!
//! [`GlobalTelemetry`] hands out the `opentelemetry::global` providers for
//! applications that install their own.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use opentelemetry::global::{self, BoxedTracer, ObjectSafeTracerProvider};
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::{InstrumentationLibrary, KeyValue};
use opentelemetry_sdk::metrics::{MeterProviderBuilder, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self as sdktrace, TracerProvider};
use opentelemetry_sdk::Resource;

use crate::service::ServiceIdentity;

/// Instrumentation scope used for the tracer and meter handed to services.
pub const INSTRUMENTATION_NAME: &str = "svcvisor";

/// Boxed error returned by telemetry initializers and shutdown hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Flushes and releases telemetry resources; called exactly once per invocation.
pub type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Returns a shutdown hook that does nothing.
pub fn noop_shutdown() -> ShutdownHook {
    Box::new(|| Box::pin(async { Ok(()) }))
}

/// Every failure collected while shutting telemetry down.
#[derive(Debug, thiserror::Error)]
#[error("telemetry shutdown failed: {}", .0.join("; "))]
pub struct ShutdownFailed(pub Vec<String>);

/// Tracer, meter and propagator handles shared by all services of one invocation.
#[derive(Clone)]
pub struct Telemetry {
    tracer_provider: Arc<dyn ObjectSafeTracerProvider + Send + Sync>,
    meter: Meter,
    propagator: Arc<dyn TextMapPropagator + Send + Sync>,
}

impl Telemetry {
    /// Wraps any tracer provider, meter and propagator.
    pub fn new<P>(
        tracer_provider: P,
        meter: Meter,
        propagator: Arc<dyn TextMapPropagator + Send + Sync>,
    ) -> Self
    where
        P: ObjectSafeTracerProvider + Send + Sync + 'static,
    {
        Self {
            tracer_provider: Arc::new(tracer_provider),
            meter,
            propagator,
        }
    }

    /// Handles backed by the OpenTelemetry global providers and an empty propagator.
    pub fn from_globals() -> Self {
        Self::new(
            global::tracer_provider(),
            global::meter(INSTRUMENTATION_NAME),
            Arc::new(TextMapCompositePropagator::new(Vec::new())),
        )
    }

    /// Returns the handles with `propagator` in place of the current one.
    pub fn with_propagator(mut self, propagator: Arc<dyn TextMapPropagator + Send + Sync>) -> Self {
        self.propagator = propagator;
        self
    }

    /// Returns the handles with `meter` in place of the current one.
    pub fn with_meter(mut self, meter: Meter) -> Self {
        self.meter = meter;
        self
    }

    /// A tracer scoped to [`INSTRUMENTATION_NAME`].
    pub fn tracer(&self) -> BoxedTracer {
        let library = InstrumentationLibrary::new(
            INSTRUMENTATION_NAME,
            Some(env!("CARGO_PKG_VERSION")),
            None::<&'static str>,
            None,
        );
        BoxedTracer::new(self.tracer_provider.boxed_tracer(Arc::new(library)))
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn propagator(&self) -> &(dyn TextMapPropagator + Send + Sync) {
        self.propagator.as_ref()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::from_globals()
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("propagator", &self.propagator)
            .finish_non_exhaustive()
    }
}

/// # Telemetry initializer.
///
/// Called once per supervisor invocation with the identities of every
/// service about to be supervised. An error is fatal: no service is started.
#[async_trait]
pub trait TelemetryInit: Send + Sync + 'static {
    /// Sets up telemetry and returns the handles plus their shutdown hook.
    async fn init(&self, services: &[ServiceIdentity])
    -> Result<(Telemetry, ShutdownHook), BoxError>;
}

/// Resource describing `identity`, merged over the SDK default resource.
///
/// Empty namespace or version attributes are left out.
pub fn service_resource(identity: &ServiceIdentity) -> Resource {
    let mut attrs = vec![KeyValue::new("service.name", identity.name.clone())];
    if !identity.namespace.is_empty() {
        attrs.push(KeyValue::new("service.namespace", identity.namespace.clone()));
    }
    if !identity.version.is_empty() {
        attrs.push(KeyValue::new("service.version", identity.version.clone()));
    }
    Resource::default().merge(&Resource::new(attrs))
}

type TraceSetup = Arc<dyn Fn(sdktrace::Builder) -> sdktrace::Builder + Send + Sync>;
type MetricSetup = Arc<dyn Fn(MeterProviderBuilder) -> MeterProviderBuilder + Send + Sync>;

/// Default initializer: SDK providers, W3C trace-context propagation, flushing shutdown.
///
/// A group shares one resource, built from its first member.
#[derive(Clone, Default)]
pub struct SdkTelemetry {
    traces: Option<TraceSetup>,
    metrics: Option<MetricSetup>,
}

impl SdkTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Customizes the tracer provider, typically to attach a span exporter.
    ///
    /// The service resource is applied after `setup` and replaces any config it set.
    pub fn with_traces<F>(mut self, setup: F) -> Self
    where
        F: Fn(sdktrace::Builder) -> sdktrace::Builder + Send + Sync + 'static,
    {
        self.traces = Some(Arc::new(setup));
        self
    }

    /// Customizes the meter provider, typically to attach a metric reader.
    pub fn with_metrics<F>(mut self, setup: F) -> Self
    where
        F: Fn(MeterProviderBuilder) -> MeterProviderBuilder + Send + Sync + 'static,
    {
        self.metrics = Some(Arc::new(setup));
        self
    }

    fn tracer_provider(&self, resource: Resource) -> TracerProvider {
        let mut builder = TracerProvider::builder();
        match &self.traces {
            Some(setup) => builder = setup(builder),
            None => tracing::warn!("no span exporter configured; spans are dropped"),
        }
        builder
            .with_config(sdktrace::config().with_resource(resource))
            .build()
    }

    fn meter_provider(&self, resource: Resource) -> SdkMeterProvider {
        let mut builder = SdkMeterProvider::builder();
        match &self.metrics {
            Some(setup) => builder = setup(builder),
            None => tracing::warn!("no metric reader configured; metrics are dropped"),
        }
        builder.with_resource(resource).build()
    }
}

impl fmt::Debug for SdkTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkTelemetry")
            .field("traces", &self.traces.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

#[async_trait]
impl TelemetryInit for SdkTelemetry {
    async fn init(
        &self,
        services: &[ServiceIdentity],
    ) -> Result<(Telemetry, ShutdownHook), BoxError> {
        let identity = services.first().cloned().unwrap_or_default();
        let resource = service_resource(&identity);

        let tracer_provider = self.tracer_provider(resource.clone());
        let meter_provider = self.meter_provider(resource);
        let meter = meter_provider.versioned_meter(
            INSTRUMENTATION_NAME,
            Some(env!("CARGO_PKG_VERSION")),
            None::<&'static str>,
            None,
        );

        let telemetry = Telemetry::new(
            tracer_provider.clone(),
            meter,
            Arc::new(TraceContextPropagator::new()),
        );
        let shutdown: ShutdownHook = Box::new(move || {
            Box::pin(async move {
                // Flushing may block on exporters.
                let failures = tokio::task::spawn_blocking(move || {
                    shutdown_providers(tracer_provider, meter_provider)
                })
                .await
                .map_err(|err| Box::new(err) as BoxError)?;
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(Box::new(ShutdownFailed(failures)) as BoxError)
                }
            })
        });

        tracing::debug!(
            services = services.len(),
            service = %identity.name,
            "telemetry initialized"
        );
        Ok((telemetry, shutdown))
    }
}

/// Flushes traces and shuts metrics down, returning every failure.
fn shutdown_providers(tracer_provider: TracerProvider, meter_provider: SdkMeterProvider) -> Vec<String> {
    let mut failures: Vec<String> = tracer_provider
        .force_flush()
        .into_iter()
        .filter_map(|res| res.err().map(|err| format!("traces: {err}")))
        .collect();
    if let Err(err) = meter_provider.shutdown() {
        failures.push(format!("metrics: {err}"));
    }
    failures
}

/// Initializer handing out the OpenTelemetry global providers, with a no-op shutdown.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalTelemetry;

#[async_trait]
impl TelemetryInit for GlobalTelemetry {
    async fn init(
        &self,
        services: &[ServiceIdentity],
    ) -> Result<(Telemetry, ShutdownHook), BoxError> {
        tracing::debug!(
            services = services.len(),
            "using OpenTelemetry global providers"
        );
        Ok((Telemetry::from_globals(), noop_shutdown()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use opentelemetry::Key;
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    use super::*;

    fn remote_context() -> opentelemetry::Context {
        let span = SpanContext::new(
            TraceId::from(0x4bf92f3577b34da6a3ce929d0e0e4736u128),
            SpanId::from(0x00f067aa0ba902b7u64),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        opentelemetry::Context::new().with_remote_span_context(span)
    }

    #[tokio::test]
    async fn test_sdk_propagator_injects_traceparent() {
        let ids = [ServiceIdentity::new("api", "billing", "1.0.0")];
        let (telemetry, shutdown) = SdkTelemetry::new().init(&ids).await.unwrap();

        let mut carrier: HashMap<String, String> = HashMap::new();
        telemetry
            .propagator()
            .inject_context(&remote_context(), &mut carrier);
        assert_eq!(
            carrier.get("traceparent").map(String::as_str),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );

        let _tracer = telemetry.tracer();
        assert!(shutdown().await.is_ok());
    }

    #[test]
    fn test_global_propagator_injects_nothing() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        Telemetry::from_globals()
            .propagator()
            .inject_context(&remote_context(), &mut carrier);
        assert!(carrier.is_empty());
    }

    #[test]
    fn test_resource_carries_identity() {
        let res = service_resource(&ServiceIdentity::new("api", "billing", "1.0.0"));
        let get = |key: &'static str| res.get(Key::from_static_str(key)).map(|v| v.to_string());
        assert_eq!(get("service.name").as_deref(), Some("api"));
        assert_eq!(get("service.namespace").as_deref(), Some("billing"));
        assert_eq!(get("service.version").as_deref(), Some("1.0.0"));

        let bare = service_resource(&ServiceIdentity::new("api", "", ""));
        assert!(bare.get(Key::from_static_str("service.namespace")).is_none());
    }

    #[test]
    fn test_shutdown_failure_lists_every_cause() {
        let err = ShutdownFailed(vec!["traces: a".into(), "metrics: b".into()]);
        assert_eq!(err.to_string(), "telemetry shutdown failed: traces: a; metrics: b");
    }

    #[tokio::test]
    async fn test_global_init_and_noop_shutdown() {
        let ids = [ServiceIdentity::new("api", "billing", "1.0.0")];
        let (telemetry, shutdown) = GlobalTelemetry.init(&ids).await.unwrap();
        let _tracer = telemetry.tracer();
        let _ = telemetry.meter();
        assert!(shutdown().await.is_ok());
    }

    #[test]
    fn test_debug_does_not_expose_providers() {
        let rendered = format!("{:?}", Telemetry::default());
        assert!(rendered.starts_with("Telemetry"));
    }
}
