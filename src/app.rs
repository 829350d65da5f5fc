use crate::config::Config;
use crate::listing::MarketService;
use crate::state::AppState;
use crate::upstream::{
    HttpFetch, MarketClient, RetryPolicy, ScrapedBuildId, SerialQueue, Transport, TtlCache,
};
use crate::utils::fmt_duration;
use crate::web::create_router;
use anyhow::Context;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often expired cache entries are dropped from memory.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Slack on top of the upstream worst case for time spent waiting in the queue.
const QUEUE_WAIT_ALLOWANCE: Duration = Duration::from_secs(30);

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
    client: Arc<MarketClient>,
    shutdown: CancellationToken,
}

impl App {
    /// Build the process-wide cache, queue, transport and services from `config`.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        config.validate().context("Invalid configuration")?;

        let http = HttpFetch::new(config.request_timeout).context("Failed to create HTTP client")?;
        let queue = SerialQueue::new(config.queue_delay);
        let retry = RetryPolicy::new(config.max_retry_attempts, config.retry_base_delay);
        let transport = Arc::new(Transport::new(
            Arc::new(http),
            queue.clone(),
            retry,
            config.request_timeout,
        ));

        let build_ids = Arc::new(ScrapedBuildId::new(
            transport.clone(),
            config.leaderboard_page_url.clone(),
            TtlCache::new(),
            config.build_id_ttl,
        ));
        let client = Arc::new(
            MarketClient::new(
                transport,
                TtlCache::new(),
                build_ids,
                &config.markets_url,
                config.leaderboard_data_url.clone(),
                config.market_cache_ttl,
            )
            .context("Failed to create market client")?,
        );
        let markets = Arc::new(MarketService::new(client.clone(), config.page_size));

        info!(
            queue_delay = fmt_duration(config.queue_delay),
            max_retry_attempts = config.max_retry_attempts,
            retry_base_delay = fmt_duration(config.retry_base_delay),
            request_timeout = fmt_duration(config.request_timeout),
            market_cache_ttl = fmt_duration(config.market_cache_ttl),
            build_id_ttl = fmt_duration(config.build_id_ttl),
            page_size = config.page_size,
            "upstream client configured"
        );

        Ok(App {
            app_state: AppState::new(markets, queue),
            client,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Serve HTTP until a shutdown signal, then drain within `SHUTDOWN_TIMEOUT`.
    pub async fn run(self) -> ExitCode {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = ?e, %addr, "failed to bind listener");
                return ExitCode::FAILURE;
            }
        };
        info!(%addr, "web server listening");

        let sweeper = self.spawn_sweeper();
        let router = create_router(self.app_state.clone(), self.handler_timeout());
        let mut server = tokio::spawn(
            axum::serve(listener, router)
                .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
                .into_future(),
        );

        let signalled = tokio::select! {
            result = &mut server => {
                error!(result = ?result, "web server exited unexpectedly");
                false
            }
            _ = shutdown_signal() => true,
        };

        let code = if signalled {
            info!(
                timeout = fmt_duration(self.config.shutdown_timeout),
                "shutdown signal received, draining connections"
            );
            self.shutdown.cancel();
            match tokio::time::timeout(self.config.shutdown_timeout, server).await {
                Ok(Ok(Ok(()))) => {
                    info!("graceful shutdown complete");
                    ExitCode::SUCCESS
                }
                Ok(Ok(Err(e))) => {
                    error!(error = ?e, "web server failed during shutdown");
                    ExitCode::FAILURE
                }
                Ok(Err(e)) => {
                    error!(error = ?e, "web server task panicked");
                    ExitCode::FAILURE
                }
                Err(_) => {
                    warn!("graceful shutdown timed out, exiting");
                    ExitCode::FAILURE
                }
            }
        } else {
            ExitCode::FAILURE
        };

        self.shutdown.cancel();
        let _ = sweeper.await;
        code
    }

    /// Drop expired cache entries periodically. Expiry itself is checked on read.
    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let client = self.client.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let purged = client.purge_expired();
                        if purged > 0 {
                            debug!(purged, "expired cache entries swept");
                        }
                    }
                }
            }
        })
    }

    /// Every attempt timing out, plus the backoff between them, plus queue wait.
    fn handler_timeout(&self) -> Duration {
        let retry = RetryPolicy::new(self.config.max_retry_attempts, self.config.retry_base_delay);
        let attempts = retry.max_attempts;
        let backoff = (0..attempts - 1)
            .map(|n| retry.delay_after(n))
            .fold(Duration::ZERO, Duration::saturating_add);
        self.config
            .request_timeout
            .saturating_mul(attempts)
            .saturating_add(backoff)
            .saturating_add(QUEUE_WAIT_ALLOWANCE)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
