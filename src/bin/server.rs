use std::{error::Error, sync::Arc};

use clap::Parser;
use tokio::{net::UdpSocket, task::JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use coap_ssp::{
    Config, Dispatcher, FeedSource, SimulatedSource, ValueSource,
    registry::{self, RegistryTarget},
    serve,
    source::feed,
};

async fn register(target: RegistryTarget) {
    match registry::announce(&target, registry::DEFAULT_TIMEOUT).await {
        Ok(payload) => {
            if let Err(e) = registry::write_response(&mut tokio::io::stdout(), &payload).await {
                warn!(error = %e, "Cannot write registry response");
            }
            info!(registry = %target, "Registration complete");
        }
        Err(e) => error!(registry = %target, error = %e, "Registration failed"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    config.validate()?;

    let mut feed_task: Option<JoinHandle<()>> = None;
    let source: Arc<dyn ValueSource> = match &config.feed {
        Some(path) => {
            let feed = Arc::new(FeedSource::new(config.feed_field.as_str()));
            let reader = feed::open(path).await?;
            info!(feed = %path, field = %config.feed_field, "Reading values from feed");

            let runner = Arc::clone(&feed);
            feed_task = Some(tokio::spawn(async move {
                if let Err(e) = runner.run(reader).await {
                    error!(error = %e, "Feed failed");
                }
            }));
            feed
        }
        None => {
            info!(interval_ms = config.interval_ms, "Simulating sensor");
            Arc::new(SimulatedSource::new(config.interval()))
        }
    };

    let socket = UdpSocket::bind(config.listen_addr()).await?;
    info!("CoAP server listening on port {}", socket.local_addr()?.port());

    let device = config.device();
    info!(
        sensor = config.sensor_name(),
        addresses = ?device.addresses(),
        "Serving device description"
    );
    let dispatcher = Dispatcher::new(source, config.builder(), device);

    let registration = match config.registry_target()? {
        Some(target) => Some(tokio::spawn(register(target))),
        None => {
            info!("No registry specified, skipping registration (use --help)");
            None
        }
    };

    let exit_after_registration = config.exit_after_registration;
    let registered = async move {
        match registration {
            Some(task) if exit_after_registration => {
                let _ = task.await;
            }
            _ => std::future::pending::<()>().await,
        }
    };
    let shutdown = async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Cannot listen for Ctrl-C");
                }
                info!("Interrupted, shutting down");
            }
            _ = registered => info!("Registration finished, shutting down"),
        }
    };

    serve::serve(socket, dispatcher.clone(), shutdown).await?;

    dispatcher.sensor().close_all();
    if let Some(task) = feed_task {
        task.abort();
    }
    Ok(())
}
