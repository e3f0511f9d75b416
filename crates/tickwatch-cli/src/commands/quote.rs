use serde::Serialize;
use tickwatch_core::{quote_message, Engine, Instrument, MarketSnapshot, TrackerService, UtcDateTime};

use crate::cli::QuoteArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct QuoteResponseData {
    instrument: Instrument,
    snapshot: MarketSnapshot,
    message: String,
}

pub async fn run(
    args: &QuoteArgs,
    service: &TrackerService,
    engine: &Engine,
) -> Result<CommandResult, CliError> {
    let instrument = service.instrument(&args.ticker).await?;
    let pipeline = engine.pipeline();
    let snapshot = pipeline
        .current_snapshot(&instrument, UtcDateTime::now())
        .await?;
    let message = quote_message(&instrument, &snapshot, pipeline.calendar().offset());

    CommandResult::ok(QuoteResponseData {
        instrument,
        snapshot,
        message,
    })
}
