// src/utils.rs
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::RateLimiter;
use std::fmt;
use std::net::IpAddr;

pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Keyed limiters are registered as app data, so each route family needs its
/// own type.
pub struct StatusLimiter(pub IpRateLimiter);
pub struct ControlLimiter(pub IpRateLimiter);

#[derive(Debug)]
pub enum RequestError {
    MissingPeerIP,
    RateLimitExceeded,
    Unauthorized,
    InvalidServerId(u16),
    IdentityProviderUnavailable,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPeerIP => write!(f, "Failed to extract client IP"),
            Self::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            Self::Unauthorized => write!(f, "Not authorized for this action"),
            Self::InvalidServerId(id) => write!(f, "Server id {} is out of range", id),
            Self::IdentityProviderUnavailable => write!(f, "Identity provider unavailable"),
        }
    }
}

impl ResponseError for RequestError {
    fn error_response(&self) -> HttpResponse {
        match self {
            Self::Unauthorized => HttpResponse::Forbidden().body(self.to_string()),
            Self::RateLimitExceeded => HttpResponse::TooManyRequests().body(self.to_string()),
            Self::InvalidServerId(_) => HttpResponse::BadRequest().body(self.to_string()),
            Self::IdentityProviderUnavailable => HttpResponse::BadGateway().body(self.to_string()),
            _ => HttpResponse::BadRequest().body(self.to_string()),
        }
    }
}

pub fn client_ip(req: &HttpRequest, trusted_proxies: &[IpAddr]) -> Result<IpAddr, RequestError> {
    let peer_ip = match req.peer_addr() {
        Some(addr) => addr.ip(),
        None => return Err(RequestError::MissingPeerIP),
    };

    // X-Forwarded-For is client-controlled unless the connection actually
    // comes from our reverse proxy, so validate the peer before believing
    // the header. A direct client is keyed on its own address.
    if !trusted_proxies.contains(&peer_ip) {
        return Ok(peer_ip);
    }

    if let Some(forwarded_for) = req.headers().get("X-Forwarded-For") {
        if let Ok(ip_str) = forwarded_for.to_str() {
            if let Some(first_ip) = ip_str.split(',').next() {
                if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                    return Ok(ip);
                }
            }
        }
    }

    Ok(peer_ip)
}

/// Pulls the token out of an `Authorization: Bearer <token>` header, if any.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
