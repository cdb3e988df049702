use std::error::Error;

use tracing::{info, instrument, trace};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod cli;
mod poll;

use estudna_cloud as cloud;
use estudna_util as util;

use crate::cli::Cli;
use crate::cloud::{Session, list_devices};

fn initialize_tracing() -> Result<(), Box<dyn Error>> {
    // Use some log defaults. These can be overriden using RUST_LOG
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::default()
            .add_directive("debug".parse()?)
            .add_directive("hyper=error".parse()?)
            .add_directive("hyper_util=error".parse()?)
            .add_directive("reqwest=info".parse()?),
    };

    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing()?;

    let cli = cli::parse();
    start(cli).await
}

#[instrument(name = "estudna", skip_all, err)]
async fn start(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = cli.remote_config();
    trace!(remote = ?config, channel = %cli.channel, "using config:");

    let session = Session::new(&config);
    session.login(&cli.username, &cli.password).await?;

    let devices = list_devices(&session).await?;
    for device in &devices {
        info!("polling device {} ({})", device.id, device.display_name());
    }

    if cli.once {
        let states = poll::read_all(&session, &devices, &cli.channel).await;
        poll::emit(&mut std::io::stdout().lock(), &states)?;
        return Ok(());
    }

    poll::start_poll(
        &session,
        &devices,
        &cli.channel,
        config.request.poll_interval,
    )
    .await?;

    Ok(())
}
