use super::client_identity;
use super::limiter::{Admission, ScanRateGate};
use actix_web::http::header::RETRY_AFTER;
use actix_web::{
    Error, HttpResponse,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures::future::{Ready, ok};
use shared::ErrorResponse;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub const RATE_LIMITED: &str = "rate_limited";

/// Rejects scan submissions past the per-client quota with 429 before any
/// classification work starts.
#[derive(Clone)]
pub struct RateLimit {
    gate: Arc<ScanRateGate>,
}

impl RateLimit {
    pub fn new(gate: Arc<ScanRateGate>) -> Self {
        Self { gate }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitService {
            service: Arc::new(service),
            gate: self.gate.clone(),
        })
    }
}

pub struct RateLimitService<S> {
    service: Arc<S>,
    gate: Arc<ScanRateGate>,
}

/// Whole seconds a client should wait, never less than one.
fn retry_after_secs(admission: &Admission) -> u64 {
    match admission {
        Admission::Limited { retry_after } => {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            secs.max(1)
        }
        Admission::Admitted { .. } => 0,
    }
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let client = client_identity(req.request());
        let admission = self.gate.admit(&client);

        Box::pin(async move {
            match admission {
                Admission::Admitted { remaining } => {
                    log::debug!("Admitted scan from {} ({} left in window)", client, remaining);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Admission::Limited { .. } => {
                    let retry_after = retry_after_secs(&admission);
                    log::warn!(
                        "Rate limited scan from {} on {}; retry in {}s",
                        client,
                        req.path(),
                        retry_after
                    );

                    let (http_req, _payload) = req.into_parts();
                    let response = HttpResponse::TooManyRequests()
                        .insert_header((RETRY_AFTER, retry_after.to_string()))
                        .json(ErrorResponse {
                            success: false,
                            error: RATE_LIMITED.to_string(),
                            retry_after: Some(retry_after),
                        })
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}
