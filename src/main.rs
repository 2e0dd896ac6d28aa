// Medication reminder service: tracks medications, pill stock and dose
// history, and raises an alert once a day when a medication's scheduled
// time comes around.
mod clock;
mod error;
mod models;
mod ports;
mod routes;
mod scheduler;
mod sinks;
mod store;
mod types;
mod util;

use actix_web::{error::InternalError, web::{self, Data}, App, HttpResponse, HttpServer};
use dotenv::dotenv;
use log::{error, info};
use std::{env, process::exit, sync::Arc};

use clock::SystemClock;
use ports::AlertSink;
use scheduler::{LoopExit, ReminderScheduler};
use sinks::{AlertFeed, FanoutSink, LogSink, WebhookSink};
use store::MedicationStore;
use types::{SharedScheduler, SharedStore};
use util::{HOST, PORT};

pub const LOG_CONFIG_PATH: &str = "log4rs.yaml";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    if let Err(e) = util::check_environment_vars() {
        eprintln!("Invalid configuration: {e}");
        exit(1)
    }
    util::init_logging();

    let (scheduler_config, low_stock_days) = match (util::scheduler_config(), util::low_stock_days()) {
        (Ok(config), Ok(days)) => (config, days),
        (Err(e), _) | (_, Err(e)) => {
            error!("Invalid configuration: {}", e);
            exit(1)
        }
    };

    let store_path = util::store_path();
    let store: SharedStore = match MedicationStore::open(&store_path).await {
        Ok(store) => Arc::new(store.with_low_stock_days(low_stock_days)),
        Err(e) => {
            error!("Could not open medication store {}: {}", store_path, e);
            exit(1)
        }
    };

    let feed = AlertFeed::new();
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink), Arc::new(feed.clone())];
    if let Some((url, token)) = util::webhook_target() {
        match WebhookSink::new(url.clone(), token, scheduler_config.sink_timeout) {
            Ok(webhook) => {
                info!("Alerts will also be posted to {}", url);
                sinks.push(Arc::new(webhook));
            }
            Err(e) => error!("Webhook sink disabled: {}", e),
        }
    }

    let scheduler: SharedScheduler = Arc::new(ReminderScheduler::new(
        Arc::new(SystemClock),
        store.clone(),
        Arc::new(FanoutSink::new(sinks)),
        scheduler_config,
    ));
    let scheduler_handle = scheduler.start();

    let store_data = Data::new(store);
    let scheduler_data = Data::new(Arc::clone(&scheduler));
    let feed_data = Data::new(feed);

    let host = env::var(HOST).unwrap_or(String::from("127.0.0.1"));
    let port = env::var(PORT).unwrap_or(String::from("9898"));

    let server_handle = HttpServer::new(move || {
        let json_cfg = web::JsonConfig::default()
            .error_handler(|err, _req| {
                error!("Json config error: {}", err);
                InternalError::from_response(err, HttpResponse::BadRequest().into()).into()
            });
        App::new()
            .app_data(Data::clone(&store_data))
            .app_data(Data::clone(&scheduler_data))
            .app_data(Data::clone(&feed_data))
            .app_data(json_cfg)
            .configure(routes::configure)
    })
        .bind(format!("{}:{}", host, port))?
        .run();

    // A loop stopped over HTTP can be started again, so only a clock fault ends the process.
    let clock_fault = async {
        let mut handle = scheduler_handle;
        loop {
            if let LoopExit::ClockFault(fault) = handle.stopped().await {
                return fault;
            }
            loop {
                tokio::time::sleep(scheduler.config().poll_interval).await;
                if let Some(next) = scheduler.current_handle() {
                    handle = next;
                    break;
                }
            }
        }
    };

    tokio::select! {
        result = server_handle => result?,
        fault = clock_fault => {
            error!("Reminder scheduler stopped: {}", fault);
            exit(2)
        }
    }
    scheduler.stop();
    Ok(())
}
