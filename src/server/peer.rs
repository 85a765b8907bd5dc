//! Peer address extractor that also works without `ConnectInfo` (tests
//! driving the router directly).

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Remote address of a request, for logging only. `forwarded_for` is taken
/// verbatim from the first `X-Forwarded-For` hop and is not trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerAddr {
    pub socket: Option<SocketAddr>,
    pub forwarded_for: Option<String>,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.socket {
            Some(addr) => write!(f, "{}", addr)?,
            None => f.write_str("unknown")?,
        }
        if let Some(forwarded) = &self.forwarded_for {
            write!(f, " (for {})", forwarded)?;
        }
        Ok(())
    }
}

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let socket = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        let forwarded_for = parts
            .headers
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|hop| hop.trim().to_string())
            .filter(|hop| !hop.is_empty());
        async move {
            Ok(PeerAddr {
                socket,
                forwarded_for,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> PeerAddr {
        let (mut parts, _) = request.into_parts();
        PeerAddr::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_without_connect_info() {
        let peer = extract(Request::new(())).await;
        assert_eq!(peer, PeerAddr::default());
        assert_eq!(peer.to_string(), "unknown");
    }

    #[tokio::test]
    async fn test_with_connect_info_and_forwarded_header() {
        let addr: SocketAddr = "10.1.2.3:4567".parse().unwrap();
        let mut request = Request::builder()
            .header(FORWARDED_FOR, "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        let peer = extract(request).await;
        assert_eq!(peer.socket, Some(addr));
        assert_eq!(peer.forwarded_for.as_deref(), Some("203.0.113.9"));
        assert_eq!(peer.to_string(), "10.1.2.3:4567 (for 203.0.113.9)");
    }
}
