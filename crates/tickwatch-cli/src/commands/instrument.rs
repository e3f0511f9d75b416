use tickwatch_core::{CoreError, InstrumentStore, TrackerService};

use crate::cli::InstrumentAddArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn add(args: &InstrumentAddArgs, service: &TrackerService) -> Result<CommandResult, CliError> {
    let instrument = service
        .register_instrument(&args.ticker, &args.locator, args.name.as_deref())
        .await?;
    CommandResult::ok(instrument)
}

pub async fn list(store: &dyn InstrumentStore) -> Result<CommandResult, CliError> {
    let instruments = store.list_instruments().await.map_err(CoreError::from)?;
    CommandResult::ok(instruments)
}
