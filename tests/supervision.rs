use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use svcvisor::{
    BoxError, Options, RunError, Service, ServiceContext, ServiceError, ServiceIdentity,
    ServiceRef, ShutdownHook, Supervisor, Telemetry, TelemetryInit, Violation,
};

/// What `run` does on every attempt.
#[derive(Clone)]
enum Behavior {
    Fail(ServiceError),
    FailTimes(u32),
    Panic(&'static str),
    WaitCancel,
    OkAfter(Duration),
    FailAfter(Duration, ServiceError),
}

struct Stub {
    name: &'static str,
    namespace: &'static str,
    behavior: Behavior,
    close_error: Option<ServiceError>,
    inits: AtomicU32,
    runs: AtomicU32,
    closes: AtomicU32,
}

impl Stub {
    fn new(name: &'static str, namespace: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            namespace,
            behavior,
            close_error: None,
            inits: AtomicU32::new(0),
            runs: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        })
    }

    fn with_close_error(name: &'static str, behavior: Behavior, err: ServiceError) -> Arc<Self> {
        Arc::new(Self {
            name,
            namespace: "test",
            behavior,
            close_error: Some(err),
            inits: AtomicU32::new(0),
            runs: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        })
    }

    fn inits(&self) -> u32 {
        self.inits.load(Ordering::SeqCst)
    }

    fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for Stub {
    fn name(&self) -> &str {
        self.name
    }

    fn namespace(&self) -> &str {
        self.namespace
    }

    async fn init(&self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::FailTimes(times) if n <= *times => Err(ServiceError::fail("not yet")),
            Behavior::FailTimes(_) => Ok(()),
            Behavior::Panic(msg) => panic!("{msg}"),
            Behavior::WaitCancel => {
                ctx.cancelled().await;
                Err(ServiceError::Canceled)
            }
            Behavior::OkAfter(after) => {
                tokio::time::sleep(*after).await;
                Ok(())
            }
            Behavior::FailAfter(after, err) => {
                tokio::time::sleep(*after).await;
                Err(err.clone())
            }
        }
    }

    async fn close(&self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.close_error.clone().map_or(Ok(()), Err)
    }
}

fn base() -> Options {
    Options::default()
        .with_restart_on_error_delay(Duration::ZERO)
        .with_grace_period(Duration::ZERO)
        .with_handle_signals(false)
}

fn supervisor(opts: Options) -> Supervisor {
    supervisor_with_env(opts, HashMap::new())
}

fn supervisor_with_env(opts: Options, env: HashMap<String, String>) -> Supervisor {
    Supervisor::builder(opts)
        .with_env(Arc::new(env))
        .with_logging(false)
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_restart_disabled_returns_first_failure() {
    let stub = Stub::new("api", "test", Behavior::Fail(ServiceError::fail("x")));
    let opts = base().with_restart_on_error(false);

    let err = supervisor(opts).run(stub.clone()).await.unwrap_err();
    match err {
        RunError::Run { service, source } => {
            assert_eq!(service, "api");
            assert_eq!(source, ServiceError::fail("x"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stub.runs(), 1);
    assert_eq!(stub.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_grace_count_allows_n_plus_one_attempts() {
    let stub = Stub::new("api", "test", Behavior::Fail(ServiceError::fail("down")));
    let opts = base().with_grace_count(2);

    let err = supervisor(opts).run(stub.clone()).await.unwrap_err();
    assert!(matches!(err, RunError::GraceCountExceeded { count: 2, .. }));
    assert_eq!(stub.runs(), 3);
    assert_eq!(stub.closes(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_bounds_restarts_in_time() {
    let stub = Stub::new("api", "test", Behavior::Fail(ServiceError::fail("down")));
    let opts = base()
        .with_restart_on_error_delay(Duration::from_secs(1))
        .with_grace_period(Duration::from_secs(5))
        .with_grace_count(0);

    let err = supervisor(opts).run(stub.clone()).await.unwrap_err();
    match &err {
        RunError::GracePeriodExceeded { period, source } => {
            assert_eq!(*period, Duration::from_secs(5));
            assert!(matches!(**source, RunError::Run { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
    // attempts start at t = 0s, 1s, ... ; the one at 6s exceeds the 5s window
    assert_eq!(stub.runs(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_panic_without_restart_is_reported() {
    let stub = Stub::new("api", "test", Behavior::Panic("boom"));
    let opts = base().with_restart_on_panic(false);

    let err = supervisor(opts).run(stub.clone()).await.unwrap_err();
    let panic = err.panic().expect("panic error");
    assert_eq!(panic.cause, "boom");
    assert_eq!(panic.service, "api");
    assert!(!panic.stack.is_empty());
    assert_eq!(stub.runs(), 1);
    assert_eq!(stub.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panics_are_restarted_within_budget() {
    let stub = Stub::new("api", "test", Behavior::Panic("boom"));
    let opts = base().with_grace_count(1);

    let err = supervisor(opts).run(stub.clone()).await.unwrap_err();
    assert!(matches!(err, RunError::GraceCountExceeded { count: 1, .. }));
    assert_eq!(err.panic().map(|p| p.cause.as_str()), Some("boom"));
    assert_eq!(stub.runs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_runs_once_per_attempt_and_never_overrides() {
    let stub = Stub::with_close_error(
        "api",
        Behavior::FailTimes(2),
        ServiceError::fail("flush failed"),
    );

    let res = supervisor(base()).run(stub.clone()).await;
    assert!(res.is_ok());
    assert_eq!(stub.inits(), 3);
    assert_eq!(stub.runs(), 3);
    assert_eq!(stub.closes(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_stops_regardless_of_budget() {
    let stub = Stub::new("api", "test", Behavior::Fail(ServiceError::fatal("bad config")));
    let opts = base().with_grace_count(0);

    let err = supervisor(opts).run(stub.clone()).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(stub.runs(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_group_starts_nothing() {
    let first = Stub::new("a", "b", Behavior::WaitCancel);
    let second = Stub::new("a", "b", Behavior::WaitCancel);
    let services: Vec<ServiceRef> = vec![first.clone(), second.clone()];

    let err = supervisor(base()).run_group(services).await.unwrap_err();
    match err {
        RunError::Invalid { violations } => assert_eq!(
            violations,
            [Violation::Duplicate {
                name: "a".into(),
                namespace: "b".into()
            }]
        ),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(first.inits() + second.inits(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_identity_is_rejected() {
    let stub = Stub::new("", "test", Behavior::WaitCancel);

    let err = supervisor(base()).run(stub.clone()).await.unwrap_err();
    assert!(matches!(err, RunError::Invalid { .. }));
    assert_eq!(stub.inits(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_not_a_failure() {
    let stub = Stub::new("api", "test", Behavior::WaitCancel);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let res = supervisor(base()).run_with(stub.clone(), token).await;
    assert!(res.is_ok());
    assert_eq!(stub.runs(), 1);
    assert_eq!(stub.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_success_stops_the_group() {
    let quick = Stub::new("quick", "test", Behavior::OkAfter(Duration::from_secs(1)));
    let idle = Stub::new("idle", "test", Behavior::WaitCancel);
    let services: Vec<ServiceRef> = vec![quick.clone(), idle.clone()];

    let res = supervisor(base()).run_group(services).await;
    assert!(res.is_ok());
    assert_eq!(idle.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_failure_decides_the_group() {
    let failing = Stub::new(
        "failing",
        "test",
        Behavior::FailAfter(Duration::from_secs(1), ServiceError::fatal("disk gone")),
    );
    let idle = Stub::new("idle", "test", Behavior::WaitCancel);
    let services: Vec<ServiceRef> = vec![idle.clone(), failing.clone()];

    let err = supervisor(base()).run_group(services).await.unwrap_err();
    match err {
        RunError::Run { service, source } => {
            assert_eq!(service, "failing");
            assert!(source.is_fatal());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(idle.runs(), 1);
    assert_eq!(idle.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_env_overrides_apply_per_service() {
    let env: HashMap<String, String> = [
        ("BILLING_API_GRACE_COUNT".to_string(), "1".to_string()),
        ("BILLING_API_RESTART_ON_ERROR_DELAY".to_string(), "0s".to_string()),
    ]
    .into();
    let stub = Stub::new("api", "billing", Behavior::Fail(ServiceError::fail("down")));

    let err = supervisor_with_env(base().with_grace_count(10), env)
        .run(stub.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::GraceCountExceeded { count: 1, .. }));
    assert_eq!(stub.runs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_env_value_starts_nothing() {
    let env: HashMap<String, String> =
        [("TEST_API_GRACE_PERIOD".to_string(), "soon".to_string())].into();
    let stub = Stub::new("api", "test", Behavior::WaitCancel);

    let err = supervisor_with_env(base(), env).run(stub.clone()).await.unwrap_err();
    match err {
        RunError::Invalid { violations } => {
            assert!(matches!(&violations[..], [Violation::InvalidEnv { key, .. }] if key == "TEST_API_GRACE_PERIOD"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stub.inits(), 0);
}

/// Telemetry initializer counting init and shutdown calls.
#[derive(Default)]
struct CountingTelemetry {
    fail: bool,
    inits: Arc<AtomicU32>,
    shutdowns: Arc<AtomicU32>,
}

#[async_trait]
impl TelemetryInit for CountingTelemetry {
    async fn init(
        &self,
        services: &[ServiceIdentity],
    ) -> Result<(Telemetry, ShutdownHook), BoxError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("collector unreachable".into());
        }
        assert!(!services.is_empty());
        let shutdowns = self.shutdowns.clone();
        let hook: ShutdownHook = Box::new(move || {
            Box::pin(async move {
                shutdowns.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        Ok((Telemetry::from_globals(), hook))
    }
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_is_set_up_and_torn_down_once() {
    let telemetry = CountingTelemetry::default();
    let inits = telemetry.inits.clone();
    let shutdowns = telemetry.shutdowns.clone();
    let sup = Supervisor::builder(base())
        .with_env(Arc::new(HashMap::new()))
        .with_telemetry(Arc::new(telemetry))
        .with_logging(false)
        .build();

    let services: Vec<ServiceRef> = vec![
        Stub::new("one", "test", Behavior::OkAfter(Duration::from_secs(1))),
        Stub::new("two", "test", Behavior::WaitCancel),
    ];
    sup.run_group(services).await.unwrap();

    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_failure_starts_nothing() {
    let sup = Supervisor::builder(base())
        .with_env(Arc::new(HashMap::new()))
        .with_telemetry(Arc::new(CountingTelemetry {
            fail: true,
            ..Default::default()
        }))
        .with_logging(false)
        .build();
    let stub = Stub::new("api", "test", Behavior::WaitCancel);

    let err = sup.run(stub.clone()).await.unwrap_err();
    assert!(matches!(err, RunError::Telemetry { .. }));
    assert!(err.is_fatal());
    assert_eq!(stub.inits(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_context_carries_identity_and_prefix() {
    let seen = Arc::new(std::sync::Mutex::new(None));
    let seen_in = seen.clone();
    let svc: ServiceRef = svcvisor::ServiceFn::arc("api", "billing", move |ctx: ServiceContext| {
        let seen = seen_in.clone();
        async move {
            *seen.lock().unwrap() = Some((
                ctx.name().to_string(),
                ctx.namespace().to_string(),
                ctx.env_prefix().to_string(),
                ctx.env_var("db_url"),
                ctx.attempt(),
            ));
            Ok::<(), ServiceError>(())
        }
    });
    let env: HashMap<String, String> =
        [("BILLING_API_DB_URL".to_string(), "postgres://db".to_string())].into();

    supervisor_with_env(base(), env).run(svc).await.unwrap();
    assert_eq!(
        seen.lock().unwrap().clone(),
        Some((
            "api".to_string(),
            "billing".to_string(),
            "BILLING_API".to_string(),
            Some("postgres://db".to_string()),
            1,
        ))
    );
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "boom")]
async fn test_unrecovered_panic_propagates_to_caller() {
    let stub = Stub::new("api", "test", Behavior::Panic("boom"));
    let opts = base().with_recover_panic(false);
    let _ = supervisor(opts).run(stub).await;
}

#[derive(Debug, serde::Deserialize)]
struct ApiConfig {
    db_url: String,
    workers: u32,
}

#[tokio::test(start_paused = true)]
async fn test_default_telemetry_and_typed_env_reach_the_service() {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    let seen = Arc::new(std::sync::Mutex::new(None));
    let seen_in = seen.clone();
    let svc: ServiceRef = svcvisor::ServiceFn::arc("api", "billing", move |ctx: ServiceContext| {
        let seen = seen_in.clone();
        async move {
            let remote = SpanContext::new(
                TraceId::from(1u128),
                SpanId::from(2u64),
                TraceFlags::SAMPLED,
                true,
                TraceState::default(),
            );
            let cx = opentelemetry::Context::new().with_remote_span_context(remote);
            let mut carrier: HashMap<String, String> = HashMap::new();
            ctx.telemetry().propagator().inject_context(&cx, &mut carrier);

            let cfg: ApiConfig = ctx.load_env().map_err(ServiceError::fatal)?;
            *seen.lock().unwrap() = Some((carrier.contains_key("traceparent"), cfg));
            Ok::<(), ServiceError>(())
        }
    });
    let env: HashMap<String, String> = [
        ("BILLING_API_DB_URL".to_string(), "postgres://db".to_string()),
        ("BILLING_API_WORKERS".to_string(), "4".to_string()),
    ]
    .into();

    supervisor_with_env(base(), env).run(svc).await.unwrap();
    let (injected, cfg) = seen.lock().unwrap().take().unwrap();
    assert!(injected);
    assert_eq!(cfg.db_url, "postgres://db");
    assert_eq!(cfg.workers, 4);
}
