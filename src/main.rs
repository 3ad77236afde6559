use std::io::{self, Write};
use std::process;

use storyline::{
    cache::{CacheStore, EventBus, keys},
    config::{self, SeriesArgs},
    domain::types::KbEntityType,
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    let command = cli_args.command.unwrap_or(config::Command::Ping);

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Ping => run_ping(settings).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
        config::Command::Keys(args) => print_keys(&args),
    }
}

async fn run_ping(settings: config::Settings) -> Result<(), InfraError> {
    let store = CacheStore::new(settings.cache);
    let status = store.connect().await;
    let bus = EventBus::from(&settings.events);
    info!(%status, dispatch = ?bus.mode(), "Cache store checked");

    let mut out = io::stdout().lock();
    writeln!(out, "cache store: {status}")?;
    writeln!(out, "event dispatch: {:?}", bus.mode())?;

    store.disconnect().await;
    Ok(())
}

async fn run_purge(settings: config::Settings, args: SeriesArgs) -> Result<(), InfraError> {
    let store = CacheStore::new(settings.cache);
    let status = store.connect().await;
    if !status.is_connected() {
        store.disconnect().await;
        return Err(InfraError::configuration(format!(
            "cannot purge while the cache store is {status}"
        )));
    }

    let pattern = keys::patterns::series_scope(args.series);
    let result = store.try_delete_pattern(&pattern).await;
    store.disconnect().await;
    let removed = result?;

    info!(series_id = %args.series, removed, "Series cache purged");
    let mut out = io::stdout().lock();
    writeln!(out, "removed {removed} keys matching {pattern}")?;
    Ok(())
}

fn print_keys(args: &SeriesArgs) -> Result<(), InfraError> {
    let series_id = args.series;
    let mut out = io::stdout().lock();

    writeln!(out, "keys:")?;
    for key in [
        keys::series(series_id),
        keys::series_export(series_id),
        keys::continuity(series_id),
        keys::canvas(series_id),
    ] {
        writeln!(out, "  {key}")?;
    }

    writeln!(out, "patterns:")?;
    let mut patterns = vec![
        keys::patterns::series_scope(series_id),
        keys::patterns::series_lists(),
        keys::patterns::script_lists(series_id),
        keys::patterns::knowledge_base(series_id),
        keys::patterns::kb_search(series_id),
        keys::patterns::continuity(series_id),
    ];
    patterns.extend(
        KbEntityType::ALL
            .into_iter()
            .map(|entity_type| keys::patterns::kb_type(series_id, entity_type)),
    );
    for pattern in patterns {
        writeln!(out, "  {pattern}")?;
    }
    Ok(())
}
