use serde_json::json;
use tickwatch_core::{TrackerId, TrackerService};

use crate::cli::{TrackerAddArgs, TrackerListArgs, TrackerRemoveArgs};
use crate::error::CliError;

use super::CommandResult;

pub async fn add(args: &TrackerAddArgs, service: &TrackerService) -> Result<CommandResult, CliError> {
    let tracker = service
        .add_tracker(&args.external_id, &args.ticker, args.target, args.tolerance)
        .await?;
    CommandResult::ok(tracker)
}

pub async fn list(args: &TrackerListArgs, service: &TrackerService) -> Result<CommandResult, CliError> {
    CommandResult::ok(service.list(&args.external_id).await?)
}

pub async fn remove(
    args: &TrackerRemoveArgs,
    service: &TrackerService,
) -> Result<CommandResult, CliError> {
    service.remove(TrackerId(args.id)).await?;
    CommandResult::ok(json!({ "removed": args.id }))
}
