use std::future;

use anyhow::Result;
use clap::Parser;
use futures_util::TryFutureExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};
use tap::TapFallible;
use tokio::sync::watch;
use tracing::{error, info};

use crate::cf_dns::CfDns;
use crate::config::Options;
use crate::disco::Controller;
use crate::metrics::Metrics;

pub mod cf_dns;
pub mod config;
pub mod disco;
pub mod dns;
pub mod ingress;
pub mod metrics;
mod trace;

pub async fn run() -> Result<()> {
    let options = Options::parse();

    trace::init_tracing()?;

    info!(?options, "parse options done");

    options
        .check()
        .tap_err(|err| error!(%err, "invalid options"))?;

    let client = Client::try_default().await?;

    info!("init k8s client");

    let cf_dns = CfDns::new(options.credentials()?)?;

    info!("init cf dns client");

    let api: Api<Ingress> = match &options.namespace {
        None => Api::all(client),
        Some(namespace) => Api::namespaced(client, namespace),
    };

    let metrics = Metrics::new()?;

    let (stop_sender, stop) = watch::channel(false);

    let metrics_server = tokio::spawn(
        metrics::serve(options.metric_port, metrics.clone(), stop)
            .inspect_err(|err| error!(%err, "metrics server failed")),
    );

    let controller = Controller::new(api, cf_dns, options.controller_settings(), metrics);

    let controller_stop = async move {
        shutdown_signal().await;

        let _ = stop_sender.send(true);
    };

    let result = controller
        .start(options.threadiness, controller_stop)
        .await
        .tap_err(|err| error!(%err, "controller stopped with error"));

    if let Err(err) = metrics_server.await {
        error!(%err, "join metrics server failed");
    }

    trace::stop_tracing();

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "listen for ctrl-c failed");

            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }

            Err(err) => {
                error!(%err, "install SIGTERM handler failed");

                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("received shutdown signal");
}
