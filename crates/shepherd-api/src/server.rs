//! The server bootstrap: a caller-supplied [`Router`] merged with a base
//! router carrying `/health`, wrapped in a `tower::ServiceBuilder` trace
//! layer, run with graceful shutdown on SIGINT/SIGTERM (SPEC_FULL.md §5, §6).

use std::future::IntoFuture;

use axum::routing::get;
use axum::Router;
use futures_util::{select, FutureExt};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::options::ApiOptions;

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum ServerError {
    #[snafu(display("failed to bind to {socket_addr}"))]
    Bind {
        socket_addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[snafu(display("server loop failed"))]
    Serve { source: std::io::Error },
}

pub struct ApiServer {
    options: ApiOptions,
    router: Router,
}

impl ApiServer {
    /// Merges `router` (the caller's `/api/v1` routes) beneath a tracing
    /// layer and a base `/health` route.
    pub fn new(router: Router, options: ApiOptions) -> Self {
        tracing::debug!(socket_addr = %options.socket_addr, "create api server");
        let service_builder = ServiceBuilder::new().layer(TraceLayer::new_for_http());
        let router = router
            .layer(service_builder)
            .route("/health", get(|| async { "ok" }));
        Self { options, router }
    }

    /// Runs the server until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.options.socket_addr).await.context(BindSnafu {
            socket_addr: self.options.socket_addr,
        })?;
        tracing::info!(socket_addr = %self.options.socket_addr, "api server listening");

        let future_server = axum::serve(listener, self.router).into_future();
        let future_signal = async {
            let mut sigint = signal(SignalKind::interrupt()).expect("create SIGINT listener");
            let mut sigterm = signal(SignalKind::terminate()).expect("create SIGTERM listener");

            select! {
                signal = sigint.recv().fuse() => {
                    if signal.is_some() {
                        tracing::debug!("received SIGINT");
                    }
                },
                signal = sigterm.recv().fuse() => {
                    if signal.is_some() {
                        tracing::debug!("received SIGTERM");
                    }
                },
            };
        };

        futures_util::pin_mut!(future_server);
        futures_util::pin_mut!(future_signal);

        match futures_util::future::select(future_server, future_signal).await {
            futures_util::future::Either::Left((result, _)) => result.context(ServeSnafu),
            futures_util::future::Either::Right(((), _)) => Ok(()),
        }
    }
}
