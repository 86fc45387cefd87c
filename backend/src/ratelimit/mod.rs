pub mod limiter;
pub mod middleware;

use actix_web::HttpRequest;

/// The key scans are rate limited and recorded under: the caller's IP address.
pub fn client_identity(req: &HttpRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
