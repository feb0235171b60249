use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wisher::app::events;
use wisher::app::events::user_events::{USER_CREATED, USER_DELETED, USER_UPDATED};
use wisher::app::jobs::database_queue_driver::DatabaseQueueDriver;
use wisher::app::jobs::queue_worker::{QueueWorker, WorkerConfig};
use wisher::app::jobs::send_birthday_message_job::{SendBirthdayMessageFactory, JOB_NAME};
use wisher::app::jobs::{QueueDriver, QUEUE_BIRTHDAY};
use wisher::app::listeners::plan_birthday_sends_listener::PlanBirthdaySendsListener;
use wisher::app::services::birthday_planner_service::BirthdayPlannerService;
use wisher::app::services::email_delivery_service::EmailDeliveryService;
use wisher::app::services::sweeper_service::SweeperService;
use wisher::{config, create_app, database, AppState};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisher=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;

    let pool = database::create_pool(&config)?;
    database::run_migrations(&pool)?;

    let queue: Arc<dyn QueueDriver> = Arc::new(DatabaseQueueDriver::new(pool.clone()));
    let delivery = Arc::new(EmailDeliveryService::new(&config.delivery)?);

    // Subscribe the planner to recipient lifecycle events.
    let planner = Arc::new(BirthdayPlannerService::new(pool.clone(), queue.clone(), &config));
    let listener = Arc::new(PlanBirthdaySendsListener::new(planner));
    for topic in [USER_CREATED, USER_UPDATED, USER_DELETED] {
        events::listen(topic, listener.clone()).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = Arc::new(SweeperService::new(pool.clone(), queue.clone(), &config));
    let sweeper_handle = tokio::spawn(sweeper.clone().run(shutdown_rx));

    let mut worker = QueueWorker::new(
        WorkerConfig {
            queue_name: QUEUE_BIRTHDAY.to_string(),
            concurrency: config.queue.concurrency,
            ..Default::default()
        },
        queue.clone(),
    );
    worker
        .register_job(JOB_NAME, SendBirthdayMessageFactory::new(pool.clone(), delivery))
        .await;
    worker.start();

    let state = AppState {
        pool,
        sweeper: sweeper.clone(),
    };
    let app = create_app(state);

    let listener_socket = tokio::net::TcpListener::bind(&config.server_addr()).await?;
    tracing::info!("Server running on {}", config.server_addr());

    axum::serve(listener_socket, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop taking new work, then drain what is in flight.
    let _ = shutdown_tx.send(true);
    worker.stop(SHUTDOWN_DEADLINE).await;
    let _ = sweeper_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
