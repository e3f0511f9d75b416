mod evaluate;
mod instrument;
mod quote;
mod refresh;
mod run;
mod subscriber;
mod tracker;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tickwatch_core::{
    Engine, EngineConfig, HttpAuth, HttpFetchAdapter, LogNotifier, Notifier, ReqwestHttpClient,
    TelegramNotifier, TrackerService, Warehouse, WarehouseConfig,
};
use tracing::info;

use crate::cli::{Cli, Command, InstrumentCommand, SubscriberCommand, TrackerCommand, UpstreamArgs};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
}

impl CommandResult {
    pub fn ok(data: impl Serialize) -> Result<Self, CliError> {
        Ok(Self {
            data: serde_json::to_value(data)?,
            warnings: Vec::new(),
        })
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// JSON document printed for every command.
#[derive(Debug, Serialize)]
pub struct Output {
    pub command: &'static str,
    pub data: Value,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
}

/// Shared state the commands run against.
pub struct Runtime {
    config: EngineConfig,
    warehouse: Arc<Warehouse>,
}

impl Runtime {
    pub fn open(cli: &Cli) -> Result<Self, CliError> {
        let mut config = match &cli.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        apply_overrides(&mut config, &cli.upstream);
        config.validate()?;

        let mut warehouse_config = match &cli.home {
            Some(home) => WarehouseConfig::with_home(home),
            None => WarehouseConfig::default(),
        };
        if let Some(db) = &cli.db {
            warehouse_config.db_path = db.clone();
        }
        let warehouse = Warehouse::open(warehouse_config)?;
        info!(db_path = %warehouse.db_path().display(), "warehouse opened");

        Ok(Self {
            config,
            warehouse: Arc::new(warehouse),
        })
    }

    pub fn service(&self) -> TrackerService {
        TrackerService::new(self.warehouse.clone(), self.warehouse.clone())
    }

    pub fn engine(&self, upstream: &UpstreamArgs) -> Result<Engine, CliError> {
        let http_client = Arc::new(ReqwestHttpClient::new());

        let mut adapter = HttpFetchAdapter::new(http_client.clone(), &self.config.fetch_base_url)
            .with_timeout_ms(self.config.http_timeout_ms());
        if let Some(token) = &upstream.fetch_token {
            adapter = adapter.with_auth(HttpAuth::BearerToken(token.clone()));
        }

        let notifier: Arc<dyn Notifier> = match &upstream.telegram_token {
            Some(token) => {
                info!("alerts are delivered through Telegram");
                Arc::new(TelegramNotifier::new(http_client, token.clone()))
            }
            None => {
                info!("no Telegram token configured, alerts are only logged");
                Arc::new(LogNotifier::new())
            }
        };

        Ok(Engine::new(
            &self.config,
            self.warehouse.clone(),
            self.warehouse.clone(),
            Arc::new(adapter),
            notifier,
        )?)
    }
}

fn apply_overrides(config: &mut EngineConfig, upstream: &UpstreamArgs) {
    if let Some(url) = &upstream.fetch_url {
        config.fetch_base_url = url.clone();
    }
    if let Some(concurrency) = upstream.fetch_concurrency {
        config.fetch_concurrency = concurrency;
    }
}

pub async fn run(cli: &Cli) -> Result<Output, CliError> {
    let started = Instant::now();
    let runtime = Runtime::open(cli)?;

    let (command, result) = match &cli.command {
        Command::Run => ("run", run::run(&runtime.engine(&cli.upstream)?).await?),
        Command::Refresh(args) => (
            "refresh",
            refresh::run(args, &runtime.engine(&cli.upstream)?).await?,
        ),
        Command::Quote(args) => (
            "quote",
            quote::run(args, &runtime.service(), &runtime.engine(&cli.upstream)?).await?,
        ),
        Command::Instrument(args) => match &args.command {
            InstrumentCommand::Add(add) => {
                ("instrument.add", instrument::add(add, &runtime.service()).await?)
            }
            InstrumentCommand::List => (
                "instrument.list",
                instrument::list(runtime.warehouse.as_ref()).await?,
            ),
        },
        Command::Subscriber(args) => match &args.command {
            SubscriberCommand::Add(add) => {
                ("subscriber.add", subscriber::add(add, &runtime.service()).await?)
            }
        },
        Command::Tracker(args) => {
            let service = runtime.service();
            match &args.command {
                TrackerCommand::Add(add) => ("tracker.add", tracker::add(add, &service).await?),
                TrackerCommand::List(list) => ("tracker.list", tracker::list(list, &service).await?),
                TrackerCommand::Remove(remove) => {
                    ("tracker.remove", tracker::remove(remove, &service).await?)
                }
            }
        }
        Command::Evaluate(args) => (
            "evaluate",
            evaluate::run(args, &runtime.service(), &runtime.engine(&cli.upstream)?).await?,
        ),
    };

    let CommandResult { data, warnings } = result;
    Ok(Output {
        command,
        data,
        warnings,
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}
