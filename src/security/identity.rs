//! Caller identity for admission control.

use std::fmt;
use std::net::SocketAddr;

use axum::http::HeaderMap;

pub const X_USER_ID: &str = "x-user-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Who a request is counted against. Users and addresses live in separate
/// namespaces so a user id can never collide with an IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    User(String),
    Ip(String),
}

impl ClientIdentity {
    /// Explicit user header, else first forwarded hop, else the peer address.
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        if let Some(user) = header_str(headers, X_USER_ID) {
            return ClientIdentity::User(user.to_string());
        }

        if let Some(first_hop) = header_str(headers, X_FORWARDED_FOR)
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
        {
            return ClientIdentity::Ip(first_hop.to_string());
        }

        match peer {
            Some(addr) => ClientIdentity::Ip(addr.ip().to_string()),
            None => ClientIdentity::Ip("unknown".to_string()),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::User(id) => write!(f, "user:{id}"),
            ClientIdentity::Ip(addr) => write!(f, "ip:{addr}"),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
