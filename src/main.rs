use std::{process, sync::Arc, time::Duration};

use serde_json::json;
use shelfsync::{
    SyncClient,
    application::error::AppError,
    cache::{CacheEntry, QueryKey, SyncConfig, family, pagination::has_next_page},
    config::{self, Command, LikeArgs, SearchArgs},
    infra::{
        fixture::{self, FixtureBackend},
        telemetry,
    },
};
use shelfsync_types::{EntityRef, Item, Review};
use tracing::{Dispatch, Level, debug, dispatcher, error, info};
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
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let path = settings.fixture.path.clone().ok_or_else(|| {
        AppError::unexpected("no fixture configured; pass --fixture PATH or set fixture.path")
    })?;
    let sync = SyncConfig::from(&settings.sync);
    let backend = Arc::new(
        FixtureBackend::load(&path)
            .await?
            .with_comment_page_size(sync.comment_page_size()),
    );

    let client = SyncClient::new(
        sync,
        fixture::fetchers(Arc::clone(&backend)),
        backend.clone(),
        backend.viewer(),
    );
    debug!(
        debounce_ms = client.config().search_debounce_ms,
        comment_page_size = client.config().comment_page_size(),
        "Sync client ready"
    );

    match cli_args.command {
        Command::Search(args) => run_search(&client, args).await,
        Command::Like(args) => run_like(&client, args).await,
    }
}

async fn run_search(client: &SyncClient, args: SearchArgs) -> Result<(), AppError> {
    let search = client.book_search();
    let keystroke = Duration::from_millis(args.keystroke_ms);

    let mut typed = String::new();
    for ch in args.query.chars() {
        typed.push(ch);
        search.on_input(&typed);
        tokio::time::sleep(keystroke).await;
    }

    if let Some(outcome) = search.wait_settled().await {
        outcome?;
    }

    if args.all_pages {
        while search.active_entry().as_deref().is_some_and(has_next_page) {
            let outcome = search.load_more().await?;
            if outcome.entry().is_none() {
                break;
            }
        }
    }

    let results = search.results();
    info!(
        query = %search.current_debounced_query(),
        results = results.len(),
        "Search committed"
    );
    print_json(&json!({
        "query": search.current_debounced_query(),
        "session_token": search.session().session_token,
        "results": results,
    }))
}

async fn run_like(client: &SyncClient, args: LikeArgs) -> Result<(), AppError> {
    let feeds = [
        QueryKey::family(family::HOME_FEED),
        QueryKey::family(family::COMMUNITY_REVIEWS),
        QueryKey::family(family::REVIEW).with(args.review_id.as_str()),
    ];
    for key in &feeds {
        client.query().ensure(key).await?;
    }

    let actions = client.actions();
    let handle = if args.undo {
        actions.unlike_review(&args.review_id)
    } else {
        actions.like_review(&args.review_id)
    }?;
    let mutation_id = handle.mutation_id();
    handle.await?;

    let entity = EntityRef::review(args.review_id.as_str());
    let copies: Vec<_> = client
        .propagator()
        .affected_keys(&entity)
        .into_iter()
        .filter_map(|key| {
            let entry = client.store().get(&key)?;
            let review = find_review(&entry, &args.review_id)?;
            Some(json!({
                "key": key.to_string(),
                "like_count": review.like_count,
                "is_liked": review.is_liked,
            }))
        })
        .collect();

    print_json(&json!({
        "mutation_id": mutation_id,
        "review": entity.to_string(),
        "copies": copies,
    }))
}

fn find_review(entry: &CacheEntry, review_id: &str) -> Option<Review> {
    entry.items().find_map(|item| match item {
        Item::Review(review) if review.id == review_id => Some(review.clone()),
        Item::Activity(activity) if activity.review.id == review_id => {
            Some(activity.review.clone())
        }
        _ => None,
    })
}

fn print_json(value: &serde_json::Value) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
