//! Gateway assembly.

use crate::error::ServerError;
use crate::handlers;
use crate::health::{HealthCheck, ReadinessCheck};
use crate::router::Router;
use crate::server::Server;
use crate::settings::{
    client_settings, consumer_settings, dispatch_settings, gateway_settings, pool_config,
};
use crate::shutdown::ShutdownSignal;
use crate::state::AppState;
use agora_access::AccessEngine;
use agora_config::AgoraConfig;
use agora_core::{AgoraError, Clock, RequestContext};
use agora_hydrate::Hydrator;
use agora_middleware::{
    handler, GatewayStack, HandlerFn, InMemoryRateLimiter, PipelineError, RateLimiter, Request,
    Response, RouteHandler, RouteSpec, TokenVerifier,
};
use agora_notify::{Consumer, EventLog, Inbox, NotificationDispatcher, StoreEventLog};
use agora_rpc::{
    HttpMediaService, HttpSocialGraph, HttpUserDirectory, MediaService, SocialGraph, UserDirectory,
};
use agora_store::Database;
use http::Method;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Unconsumed events above which the gateway reports itself not ready.
pub const MAX_EVENT_BACKLOG: usize = 10_000;

/// The downstream services the gateway calls.
#[derive(Clone)]
pub struct Ports {
    /// Follow and group-membership lookups.
    pub graph: Arc<dyn SocialGraph>,
    /// User profiles.
    pub users: Arc<dyn UserDirectory>,
    /// Image URLs.
    pub media: Arc<dyn MediaService>,
}

impl std::fmt::Debug for Ports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ports").finish_non_exhaustive()
    }
}

impl Ports {
    /// Bundles the three services.
    #[must_use]
    pub fn new(
        graph: Arc<dyn SocialGraph>,
        users: Arc<dyn UserDirectory>,
        media: Arc<dyn MediaService>,
    ) -> Self {
        Self { graph, users, media }
    }

    /// JSON-over-HTTP clients at the configured URLs. The users service also
    /// answers social-graph lookups.
    pub fn http(config: &AgoraConfig) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| ServerError::setting("services", err.to_string()))?;
        let settings = client_settings(config);
        let services = &config.services;
        Ok(Self::new(
            Arc::new(HttpSocialGraph::new(&services.users_url, client.clone(), settings.clone())),
            Arc::new(HttpUserDirectory::new(&services.users_url, client.clone(), settings.clone())),
            Arc::new(HttpMediaService::new(&services.media_url, client, settings)),
        ))
    }
}

/// The wired gateway: routes, store, event log and background workers.
pub struct Gateway {
    config: AgoraConfig,
    state: AppState,
    stack: GatewayStack,
    router: Arc<Router>,
    limiter: Arc<InMemoryRateLimiter>,
    consumer: Arc<Consumer>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Wires every component from `config`, opening and migrating the
    /// database.
    pub async fn new(
        config: &AgoraConfig,
        ports: Ports,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let db = Database::connect(pool_config(config)).await?;
        let state = AppState {
            db: db.clone(),
            access: AccessEngine::new(Arc::new(db.clone()), ports.graph),
            hydrator: Hydrator::new(ports.users, ports.media),
            inbox: Inbox::new(db.clone(), Arc::clone(&clock)),
            clock: Arc::clone(&clock),
        };

        let log: Arc<dyn EventLog> = Arc::new(StoreEventLog::new(db.clone(), Arc::clone(&clock)));
        let dispatcher = NotificationDispatcher::new(db, Arc::clone(&clock), dispatch_settings(config)?);
        let consumer = Arc::new(Consumer::new(log, dispatcher, consumer_settings(config)));

        let verifier = TokenVerifier::new(
            config.auth.secret.as_bytes(),
            Duration::from_secs(config.auth.leeway_secs),
        )
        .map_err(|_| ServerError::setting("auth.secret", "unusable as a signing key"))?;
        let limiter = Arc::new(InMemoryRateLimiter::new());
        let shared: Arc<dyn RateLimiter> = limiter.clone();
        let stack = GatewayStack::new(
            shared,
            verifier,
            clock,
            gateway_settings(config)?,
        );

        let backlog = Arc::clone(&consumer);
        let readiness = ReadinessCheck::new()
            .add_check("event_backlog", move || backlog.backlog() <= MAX_EVENT_BACKLOG);
        let router = Router::new(
            HealthCheck::new(&config.telemetry.service_name, env!("CARGO_PKG_VERSION")),
            readiness,
        )
        .with_routes(routes(&stack, &state)?);

        Ok(Self {
            config: config.clone(),
            state,
            stack,
            router: Arc::new(router),
            limiter,
            consumer,
        })
    }

    /// The request router.
    #[must_use]
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    /// Handler state.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Verifier holding the signing key, for issuing credentials.
    #[must_use]
    pub const fn verifier(&self) -> &TokenVerifier {
        self.stack.verifier()
    }

    /// The notification consumer.
    #[must_use]
    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    /// Binds the configured address and serves until `shutdown`.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let listener = Server::bind(&self.config.server.http_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serves on `listener` until `shutdown`, running the limiter sweeper, the
    /// notification purger, the event consumer and, when enabled, the metrics
    /// endpoint alongside.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let config = &self.config;
        let drain = Duration::from_secs(config.server.shutdown_timeout_secs);

        let sweeper = self
            .limiter
            .spawn_sweeper(Duration::from_secs(config.rate_limit.sweep_interval_secs));
        let purger = self
            .state
            .inbox
            .spawn_purger(Duration::from_secs(config.notifications.purge_interval_secs));
        let consumer = {
            let consumer = Arc::clone(&self.consumer);
            let stop = shutdown.recv();
            tokio::spawn(async move { consumer.run(stop).await })
        };
        let metrics = if config.telemetry.metrics.enabled {
            let listener = Server::bind(&config.telemetry.metrics.addr).await?;
            let probes = Router::new(
                HealthCheck::new(&config.telemetry.service_name, env!("CARGO_PKG_VERSION")),
                ReadinessCheck::new(),
            );
            Some(tokio::spawn(
                Server::new(Arc::new(probes), drain).serve(listener, shutdown.clone()),
            ))
        } else {
            None
        };

        let result = Server::new(Arc::clone(&self.router), drain)
            .serve(listener, shutdown.clone())
            .await;

        shutdown.trigger();
        sweeper.abort();
        purger.abort();
        if let Err(err) = consumer.await {
            tracing::error!(error = %err, "notification consumer task failed");
        }
        self.state.db.close().await;
        if let Some(metrics) = metrics {
            match metrics.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "metrics server failed"),
                Err(err) => tracing::error!(error = %err, "metrics server task failed"),
            }
        }
        result
    }
}

/// Builds the gateway's business routes.
pub fn routes(stack: &GatewayStack, state: &AppState) -> Result<Vec<RouteHandler>, PipelineError> {
    [
        RouteSpec::new("/post/read", bind(state, handlers::read_post)).require_auth(),
        RouteSpec::new("/post/create", bind(state, handlers::create_post))
            .methods([Method::POST])
            .require_auth(),
        RouteSpec::new("/post/react", bind(state, handlers::react))
            .methods([Method::POST])
            .require_auth(),
        RouteSpec::new("/notifications", bind(state, handlers::list_notifications)).require_auth(),
        RouteSpec::new("/notifications/seen", bind(state, handlers::mark_seen))
            .methods([Method::POST])
            .require_auth(),
        RouteSpec::new("/notifications/acted", bind(state, handlers::mark_acted))
            .methods([Method::POST])
            .require_auth(),
    ]
    .into_iter()
    .map(|route| stack.build(route))
    .collect()
}

fn bind<F, Fut>(state: &AppState, f: F) -> HandlerFn
where
    F: Fn(AppState, Arc<RequestContext>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AgoraError>> + Send + 'static,
{
    let state = state.clone();
    handler(move |ctx, request| f(state.clone(), ctx, request))
}
