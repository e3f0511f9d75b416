use tickwatch_core::{Engine, TrackerService, UtcDateTime};

use crate::cli::EvaluateArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(
    args: &EvaluateArgs,
    service: &TrackerService,
    engine: &Engine,
) -> Result<CommandResult, CliError> {
    let subscriber = service.subscriber(&args.external_id).await?;
    let report = engine
        .evaluator()
        .evaluate_subscriber(subscriber.id, UtcDateTime::now())
        .await?;

    let mut warnings = report
        .errors
        .iter()
        .map(|failure| format!("tracker {}: {} ({})", failure.tracker_id, failure.message, failure.code))
        .collect::<Vec<_>>();
    if report.market_closed {
        warnings.push(String::from("market is closed; no tracker was evaluated"));
    }
    Ok(CommandResult::ok(report)?.with_warnings(warnings))
}
