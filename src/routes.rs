use actix_web::{delete, get, post, web, HttpResponse, Responder};
use log::{error, info, warn};
use serde_json::json;

use crate::error::StoreError;
use crate::models::{NewMedication, TakeParams};
use crate::sinks::AlertFeed;
use crate::types::{SharedScheduler, SharedStore};

fn store_error_response(e: StoreError) -> HttpResponse {
    match e {
        StoreError::NotFound(_) => HttpResponse::NotFound().json(json!({ "error": e.to_string() })),
        StoreError::Invalid(_) => HttpResponse::BadRequest().json(json!({ "error": e.to_string() })),
        StoreError::Io(_) | StoreError::Serde(_) => {
            error!("store:: {}", e);
            HttpResponse::InternalServerError().json(json!({ "error": "could not save medication data" }))
        }
    }
}

#[get("/health")]
pub async fn health() -> impl Responder {
    info!("Health check");
    HttpResponse::Ok()
}

#[get("/medications")]
async fn list_medications(store: web::Data<SharedStore>) -> impl Responder {
    HttpResponse::Ok().json(store.list_medications().await)
}

#[post("/medications")]
async fn add_medication(payload: web::Json<NewMedication>,
    store: web::Data<SharedStore>) -> impl Responder {

    match store.add_medication(payload.into_inner()).await {
        Ok(medication) => HttpResponse::Created().json(medication),
        Err(e) => store_error_response(e),
    }
}

#[get("/medications/{id}")]
async fn get_medication(id: web::Path<u64>,
    store: web::Data<SharedStore>) -> impl Responder {

    let id = id.into_inner();
    match store.get_medication(id).await {
        Some(medication) => HttpResponse::Ok().json(medication),
        None => store_error_response(StoreError::NotFound(id)),
    }
}

#[delete("/medications/{id}")]
async fn delete_medication(id: web::Path<u64>,
    store: web::Data<SharedStore>) -> impl Responder {

    match store.delete_medication(id.into_inner()).await {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => store_error_response(e),
    }
}

#[post("/medications/{id}/take")]
async fn take_dose(id: web::Path<u64>,
    params: web::Query<TakeParams>,
    store: web::Data<SharedStore>) -> impl Responder {

    let amount = params.amount.unwrap_or(1);
    if amount == 0 {
        return HttpResponse::BadRequest().json(json!({ "error": "amount must be at least 1" }));
    }
    match store.take_dose(id.into_inner(), amount).await {
        Ok(taken) => {
            if taken.low_stock {
                warn!("take:: medication {} is low on stock ({:?} days left)",
                    taken.medication_id, taken.days_remaining);
            }
            HttpResponse::Ok().json(taken)
        }
        Err(e) => store_error_response(e),
    }
}

#[post("/medications/{id}/missed")]
async fn record_missed(id: web::Path<u64>,
    store: web::Data<SharedStore>) -> impl Responder {

    match store.record_missed(id.into_inner()).await {
        Ok(entry) => HttpResponse::Ok().json(entry),
        Err(e) => store_error_response(e),
    }
}

#[get("/history")]
async fn history(store: web::Data<SharedStore>) -> impl Responder {
    HttpResponse::Ok().json(store.history().await)
}

#[get("/alerts")]
async fn recent_alerts(feed: web::Data<AlertFeed>) -> impl Responder {
    HttpResponse::Ok().json(feed.recent().await)
}

#[get("/scheduler")]
async fn scheduler_status(scheduler: web::Data<SharedScheduler>) -> impl Responder {
    let config = scheduler.config();
    HttpResponse::Ok().json(json!({
        "running": scheduler.is_running(),
        "pollIntervalS": config.poll_interval.as_secs(),
        "matchPolicy": config.match_policy,
    }))
}

#[post("/scheduler/start")]
async fn start_scheduler(scheduler: web::Data<SharedScheduler>) -> impl Responder {
    scheduler.start();
    HttpResponse::Ok()
}

#[post("/scheduler/stop")]
async fn stop_scheduler(scheduler: web::Data<SharedScheduler>) -> impl Responder {
    scheduler.stop();
    HttpResponse::Ok()
}

#[post("/scheduler/tick")]
async fn run_tick(scheduler: web::Data<SharedScheduler>) -> impl Responder {
    match scheduler.tick().await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(fault) => {
            error!("tick:: {}", fault);
            HttpResponse::ServiceUnavailable().json(json!({ "error": fault.to_string() }))
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(list_medications)
        .service(add_medication)
        .service(get_medication)
        .service(delete_medication)
        .service(take_dose)
        .service(record_missed)
        .service(history)
        .service(recent_alerts)
        .service(scheduler_status)
        .service(start_scheduler)
        .service(stop_scheduler)
        .service(run_tick);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, web::Data, App};
    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::scheduler::{ReminderScheduler, SchedulerConfig, TickReport};

    fn app_state() -> (SharedStore, SharedScheduler, AlertFeed) {
        let store: SharedStore = Arc::new(crate::store::MedicationStore::in_memory());
        let feed = AlertFeed::new();
        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::new(ManualClock::at("2024-01-01T08:00")),
            store.clone(),
            Arc::new(feed.clone()),
            SchedulerConfig::default(),
        ));
        (store, scheduler, feed)
    }

    #[actix_web::test]
    async fn add_take_and_list() {
        let (store, scheduler, feed) = app_state();
        let app = test::init_service(App::new()
            .app_data(Data::new(store))
            .app_data(Data::new(scheduler))
            .app_data(Data::new(feed))
            .configure(configure)).await;

        let req = test::TestRequest::post().uri("/medications")
            .set_json(json!({
                "name": "Lisinopril", "dosage": "10mg", "totalPills": 4,
                "pillsPerDay": 1, "scheduledTime": "08:00"
            }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let req = test::TestRequest::post().uri("/medications/1/take?amount=2").to_request();
        let taken: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(taken["remaining"], 2);
        assert_eq!(taken["lowStock"], true);

        let req = test::TestRequest::get().uri("/medications").to_request();
        let listed: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed[0]["name"], "Lisinopril");
        assert_eq!(listed[0]["scheduledTime"], "08:00");
        assert_eq!(listed[0]["daysRemaining"], 2);

        let req = test::TestRequest::get().uri("/history").to_request();
        let entries: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["status"], "Taken");
    }

    #[actix_web::test]
    async fn frequency_drives_stock_figures() {
        let (store, scheduler, feed) = app_state();
        let app = test::init_service(App::new()
            .app_data(Data::new(store))
            .app_data(Data::new(scheduler))
            .app_data(Data::new(feed))
            .configure(configure)).await;

        let req = test::TestRequest::post().uri("/medications")
            .set_json(json!({
                "name": "Vitamin D", "totalPills": 2,
                "frequency": "Once every two days", "scheduledTime": "09:00"
            }))
            .to_request();
        let created: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created["pillsPerDay"], 0);
        assert_eq!(created["frequency"], "Once every two days");

        let req = test::TestRequest::get().uri("/medications").to_request();
        let listed: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed[0]["daysRemaining"], serde_json::Value::Null);
        assert_eq!(listed[0]["lowStock"], false);

        let req = test::TestRequest::post().uri("/medications/1/missed").to_request();
        let missed: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(missed["status"], "Missed");

        let req = test::TestRequest::post().uri("/medications")
            .set_json(json!({ "name": "Aspirin", "totalPills": 4, "frequency": "Hourly" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn bad_requests_are_rejected() {
        let (store, scheduler, feed) = app_state();
        let app = test::init_service(App::new()
            .app_data(Data::new(store))
            .app_data(Data::new(scheduler))
            .app_data(Data::new(feed))
            .configure(configure)).await;

        let req = test::TestRequest::post().uri("/medications")
            .set_json(json!({ "name": "", "totalPills": 4, "pillsPerDay": 1 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post().uri("/medications/42/take").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/medications/42").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::delete().uri("/medications/42").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn manual_tick_fires_into_the_feed() {
        let (store, scheduler, feed) = app_state();
        store.add_medication(NewMedication {
            name: "Lisinopril".into(),
            dosage: "10mg".into(),
            total_pills: 30,
            pills_per_day: Some(1),
            frequency: None,
            scheduled_time: Some("08:00".into()),
        }).await.unwrap();
        let app = test::init_service(App::new()
            .app_data(Data::new(store))
            .app_data(Data::new(scheduler))
            .app_data(Data::new(feed))
            .configure(configure)).await;

        let req = test::TestRequest::post().uri("/scheduler/tick").to_request();
        let report: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report, serde_json::to_value(TickReport { matched: 1, fired: 1, ..TickReport::default() }).unwrap());

        let req = test::TestRequest::get().uri("/alerts").to_request();
        let alerts: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(alerts[0]["medicationId"], 1);
        assert_eq!(alerts[0]["name"], "Lisinopril");
    }

    #[actix_web::test]
    async fn scheduler_can_be_started_and_stopped() {
        let (store, scheduler, feed) = app_state();
        let app = test::init_service(App::new()
            .app_data(Data::new(store))
            .app_data(Data::new(scheduler.clone()))
            .app_data(Data::new(feed))
            .configure(configure)).await;

        let req = test::TestRequest::post().uri("/scheduler/start").to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert!(scheduler.is_running());

        let req = test::TestRequest::get().uri("/scheduler").to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["running"], true);
        assert_eq!(status["matchPolicy"], "exact");

        let req = test::TestRequest::post().uri("/scheduler/stop").to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert!(!scheduler.is_running());
    }
}
