use std::{process, sync::Arc};

use fireledger::{
    application::{AppContext, AppError, QueryState, ScopeChange},
    cache::{CacheConfig, Filters},
    config::{
        self, AssetsCommand, Command, ExpensesCommand, FamilyCommand, FlowsCommand,
        LedgersCommand, ScopeCommand,
    },
    domain::types::ResourceKind,
    infra::{
        client::{ApiClient, ApiLoader},
        preferences::FilePreferenceStore,
        telemetry,
    },
};
use fireledger_api_types::{Asset, ExpenseStats, Family, Flow, FlowStats, Ledger};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    let client = ApiClient::from_settings(&settings.api)?;
    let app = AppContext::new(
        CacheConfig::from(&settings.cache),
        Arc::new(ApiLoader::new(client.clone())),
        Arc::new(client),
        Arc::new(FilePreferenceStore::new(
            settings.storage.preferences_file.clone(),
        )),
    );

    // Membership decides whether a persisted family scope is still valid.
    if let Err(err) = app.scope.initialize().await {
        warn!(error = %err, "Continuing with unverified scope");
    }

    match cli_args.command {
        Command::Scope(args) => match args.command {
            ScopeCommand::Show => show_scope(&app),
            ScopeCommand::Set { scope } => match app.scope.set_scope(scope)? {
                ScopeChange::Rejected => Err(AppError::validation(
                    "family scope requires confirmed family membership",
                )),
                ScopeChange::Applied { .. } | ScopeChange::Unchanged => show_scope(&app),
            },
        },
        Command::Family(args) => match args.command {
            FamilyCommand::Show => {
                let state =
                    read::<Option<Family>>(&app, ResourceKind::Family, Filters::new()).await;
                match (state.data, state.error) {
                    (None, Some(error)) => Err(AppError::Query(error)),
                    (data, _) => print_json(&data.flatten()),
                }
            }
        },
        Command::Assets(args) => match args.command {
            AssetsCommand::List => {
                print_query::<Vec<Asset>>(&app, ResourceKind::Assets, Filters::new()).await
            }
        },
        Command::Flows(args) => match args.command {
            FlowsCommand::List { asset_id } => {
                let filters = Filters::new().with("asset_id", asset_id);
                print_query::<Vec<Flow>>(&app, ResourceKind::Flows, filters).await
            }
            FlowsCommand::Stats => {
                print_query::<FlowStats>(&app, ResourceKind::FlowStats, Filters::new()).await
            }
        },
        Command::Ledgers(args) => match args.command {
            LedgersCommand::List => {
                print_query::<Vec<Ledger>>(&app, ResourceKind::Ledgers, Filters::new()).await
            }
        },
        Command::Expenses(args) => match args.command {
            ExpensesCommand::Stats { ledger_id } => {
                let filters = Filters::new().with("ledger_id", ledger_id);
                print_query::<ExpenseStats>(&app, ResourceKind::ExpenseStats, filters).await
            }
        },
    }
}

fn show_scope(app: &AppContext) -> Result<(), AppError> {
    let membership = app.scope.membership();
    print_json(&json!({
        "scope": app.scope.scope(),
        "family_id": membership.family_id,
        "family_name": membership.family_name,
        "membership_confirmed": membership.confirmed,
    }))
}

async fn read<T: DeserializeOwned>(
    app: &AppContext,
    kind: ResourceKind,
    filters: Filters,
) -> QueryState<T> {
    app.query::<T>(kind, filters).sync().await
}

async fn print_query<T: DeserializeOwned + Serialize>(
    app: &AppContext,
    kind: ResourceKind,
    filters: Filters,
) -> Result<(), AppError> {
    let state = read::<T>(app, kind, filters).await;
    match (state.data, state.error) {
        (Some(data), _) => print_json(&data),
        (None, Some(error)) => Err(AppError::Query(error)),
        (None, None) => Err(AppError::Query(format!("{kind} returned no data"))),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::unexpected(format!("failed to render output: {e}")))?;
    println!("{out}");
    Ok(())
}
