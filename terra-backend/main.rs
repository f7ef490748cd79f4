mod agents;
mod api;
mod chat;
mod config;
mod prompts;

use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::agents::openai::{OpenAiAgent, OpenAiClient, OpenAiSuggestor};
use crate::chat::pipeline::ResolutionSearch;
use crate::chat::state::ConversationStore;
use crate::prompts::library::PromptLibrary;
use crate::prompts::resolution::related_queries_prompt;

#[derive(Parser)]
#[command(name = "terra", about = "Map-view resolution search backend")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve {
        /// Listen on this port instead of $PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve { port: None }
    } else {
        Cli::parse()
    };

    match cli {
        Cli::Serve { port } => run_server(port).await,
    }
}

async fn run_server(port_override: Option<u16>) -> Result<(), Box<dyn Error>> {
    let config = config::Config::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("terra=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    // Analyses stream for a while, so only the connect phase is bounded tightly.
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(180))
        .build()
        .context("failed to build HTTP client")?;

    let prompts = PromptLibrary::load_or_default(config.prompts_path.as_deref())
        .context("failed to load prompt library")?;
    let related_prompt =
        related_queries_prompt(&prompts).context("related-queries prompt is invalid")?;

    if config.agent_api_key.is_none() {
        tracing::warn!(base_url = %config.agent_base_url, "TERRA_AGENT_API_KEY not set, calling agent without credentials");
    }
    let client = OpenAiClient::new(
        http_client,
        &config.agent_base_url,
        config.agent_api_key.clone(),
        &config.agent_model,
    );

    let pipeline = ResolutionSearch::new(
        Arc::new(ConversationStore::new()),
        Arc::new(OpenAiAgent::new(client.clone())),
        Arc::new(OpenAiSuggestor::new(client, related_prompt)),
        Arc::new(prompts),
        config.pipeline_settings(),
    );

    let app = api::create_app(api::AppState::new(pipeline))
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let port = port_override.unwrap_or(config.port);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(model = %config.agent_model, "Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
