use tickwatch_core::TrackerService;

use crate::cli::SubscriberAddArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn add(args: &SubscriberAddArgs, service: &TrackerService) -> Result<CommandResult, CliError> {
    let subscriber = service
        .register_subscriber(&args.external_id, &args.name)
        .await?;
    CommandResult::ok(subscriber)
}
