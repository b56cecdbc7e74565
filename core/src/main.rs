mod cors;
mod redis;

use std::sync::Arc;

use actix_web::{
    App, HttpServer,
    web::{self},
};
use api_subs::services::{
    cache::{RedisSnapshotCache, SnapshotCache},
    reconcile::ReconciliationService,
    stripe::{BillingProvider, StripeBilling},
};
use common::{email::EmailClient, env_config::Config};
use db::ledger::{PgLedger, UsageLedger};
use limiter::{gate::UsageGate, notifier::ResendNotifier};
use rag::{
    assistant::{Assistant, OpenAiChatModel},
    embedder::{Embedder, OpenAiEmbedder},
    ingest::Ingestor,
    retriever::Retriever,
    splitter::TextSplitter,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // get env vars
    let config = Config::from_env();
    let config_data = config.clone();

    let is_production = config.environment == "production";
    let origin = config.cors_allowed_origin.clone();

    logger::setup().expect("Failed to set up logger");

    // init db connection
    let pool = db::setup(&config.database_url, is_production)
        .await
        .expect("Failed to set up database");

    // init Redis
    let redis_pool = redis::setup_redis(&config);

    // billing and usage
    let cache: Arc<dyn SnapshotCache> = Arc::new(RedisSnapshotCache::new(redis_pool));
    let billing: Arc<dyn BillingProvider> = Arc::new(StripeBilling::new(&config.stripe_secret_key));
    let ledger: Arc<dyn UsageLedger> = Arc::new(PgLedger::new(pool.clone()));
    let reconciliation = Arc::new(ReconciliationService::new(
        billing.clone(),
        cache.clone(),
        ledger.clone(),
        config.billing.clone(),
        config.stripe_webhook_secret.clone(),
    ));
    let notifier = Arc::new(ResendNotifier::new(EmailClient::new(
        config.resend_api_key.clone(),
        config.email_from.clone(),
    )));
    let gate = Arc::new(UsageGate::new(
        ledger,
        billing,
        cache,
        notifier,
        config.billing.clone(),
    ));

    // retrieval
    let http = reqwest::Client::new();
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
        http.clone(),
        config.openai_api_key.clone(),
    ));
    let retriever = Arc::new(Retriever::new(pool.clone(), embedder.clone()));
    let assistant = Arc::new(Assistant::new(
        Arc::new(OpenAiChatModel::new(http, config.openai_api_key.clone())),
        retriever,
    ));
    let ingestor = Arc::new(Ingestor::new(
        pool.clone(),
        embedder,
        TextSplitter::default(),
    ));

    log::info!(
        "Listening on {}:{}",
        config.server_host,
        config.server_port
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(config_data.clone()))
            .app_data(web::Data::new(reconciliation.clone()))
            .app_data(web::Data::new(gate.clone()))
            .app_data(web::Data::new(assistant.clone()))
            .app_data(web::Data::new(ingestor.clone()))
            .wrap(logger::middleware(config_data.console_logging_enabled)) // 2nd
            .wrap(cors::middleware(&origin)) // 1st
            .service(
                web::scope("/api")
                    .service(api_auth::mount_auth())
                    .service(api_subs::mount_webhook())
                    .service(
                        web::scope("/app")
                            .wrap(api_auth::auth_middleware(config_data.clone()))
                            .configure(api_auth::configure_user)
                            .configure(api_chat::configure_listings)
                            .service(api_subs::mount_subs())
                            .service(api_chat::mount_chat())
                            .service(api_chat::mount_files()),
                    ),
            )
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .workers(config.num_workers)
    .run()
    .await
}
