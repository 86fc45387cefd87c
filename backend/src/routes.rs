use crate::classifier::orchestrator::ScanOrchestrator;
use crate::history::ScanHistory;
use crate::history::models::ScanRecord;
use crate::image_ref::{ImageRef, ImageRefError, MAX_IMAGE_BYTES};
use crate::ratelimit::client_identity;
use crate::ratelimit::limiter::ScanRateGate;
use crate::ratelimit::middleware::RateLimit;
use actix_multipart::Multipart;
use actix_web::{Error, HttpRequest, HttpResponse, error, web};
use futures::TryStreamExt;
use log::{error, info};
use serde_json::json;
use shared::{ErrorResponse, HealthResponse, ScanRequest};
use std::sync::Arc;

/// Base64 inflates payloads by a third; leave room for the JSON envelope.
const MAX_JSON_BYTES: usize = MAX_IMAGE_BYTES / 3 * 4 + 64 * 1024;

pub fn configure_routes(cfg: &mut web::ServiceConfig, gate: Arc<ScanRateGate>) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(MAX_JSON_BYTES)
            .error_handler(|err, _req| {
                let message = err.to_string();
                error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(ErrorResponse::new(message)),
                )
                .into()
            }),
    )
    .service(web::resource("/").route(web::get().to(index)))
    .service(web::resource("/health").route(web::get().to(health)))
    .service(web::resource("/api/scans").route(web::get().to(list_scans)))
    .service(
        web::scope("/api/scan")
            .wrap(RateLimit::new(gate))
            .service(web::resource("").route(web::post().to(handle_scan)))
            .service(web::resource("/upload").route(web::post().to(handle_upload))),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "message": "Welcome to ReLoop API v1" }))
}

async fn health(orchestrator: web::Data<ScanOrchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        model: orchestrator.model_status().as_str().to_string(),
    })
}

fn bad_image(e: ImageRefError) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse::new(e.to_string()))
}

async fn handle_scan(
    req: HttpRequest,
    body: web::Json<ScanRequest>,
    orchestrator: web::Data<ScanOrchestrator>,
    history: web::Data<dyn ScanHistory>,
) -> HttpResponse {
    match ImageRef::parse(&body.image) {
        Ok(image) => respond(&req, image, &orchestrator, history).await,
        Err(e) => bad_image(e),
    }
}

async fn handle_upload(
    req: HttpRequest,
    mut payload: Multipart,
    orchestrator: web::Data<ScanOrchestrator>,
    history: web::Data<dyn ScanHistory>,
) -> Result<HttpResponse, Error> {
    let mut upload = Vec::new();

    while let Some(mut field) = payload.try_next().await? {
        while let Some(chunk) = field.try_next().await? {
            if upload.len() + chunk.len() > MAX_IMAGE_BYTES {
                return Ok(bad_image(ImageRefError::TooLarge(MAX_IMAGE_BYTES)));
            }
            upload.extend_from_slice(&chunk);
        }
        if !upload.is_empty() {
            break;
        }
    }

    match ImageRef::from_bytes(&upload) {
        Ok(image) => Ok(respond(&req, image, &orchestrator, history).await),
        Err(e) => Ok(bad_image(e)),
    }
}

async fn respond(
    req: &HttpRequest,
    image: ImageRef,
    orchestrator: &ScanOrchestrator,
    history: web::Data<dyn ScanHistory>,
) -> HttpResponse {
    let client = client_identity(req);
    let response = orchestrator.analyze(&image).await;
    info!(
        "Scan for {}: {} ({}), {} coins",
        client,
        response.item.object_name,
        response.item.category,
        response.item.estimated_reward
    );

    let record = ScanRecord::new(image.digest(), response.clone());
    actix_web::rt::spawn(async move {
        if let Err(e) = history.record(&client, record).await {
            error!("Failed to record scan for {}: {:?}", client, e);
        }
    });

    HttpResponse::Ok().json(response)
}

async fn list_scans(req: HttpRequest, history: web::Data<dyn ScanHistory>) -> HttpResponse {
    let client = client_identity(&req);
    match history.list(&client).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            error!("Failed to load scan history for {}: {:?}", client, e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to load scan history"))
        }
    }
}
