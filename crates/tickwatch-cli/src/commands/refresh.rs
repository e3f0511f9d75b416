use tickwatch_core::{Engine, RefreshMode, UtcDateTime};

use crate::cli::RefreshArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &RefreshArgs, engine: &Engine) -> Result<CommandResult, CliError> {
    let mode = if args.force {
        RefreshMode::Force
    } else {
        RefreshMode::Policy
    };
    let now = UtcDateTime::now();
    let pipeline = engine.pipeline();
    let report = if args.all {
        pipeline.refresh_all(mode, now).await?
    } else {
        pipeline.refresh_tracked(mode, now).await?
    };

    let mut warnings = report
        .failed
        .iter()
        .map(|failure| format!("{}: {} ({})", failure.ticker, failure.message, failure.code))
        .collect::<Vec<_>>();
    if report.market_closed {
        warnings.push(String::from(
            "market is closed; nothing was fetched (use --force to refresh anyway)",
        ));
    }
    Ok(CommandResult::ok(report)?.with_warnings(warnings))
}
