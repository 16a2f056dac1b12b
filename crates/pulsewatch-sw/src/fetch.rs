//! Fetch events and the responses the worker answers them with.

use pulsewatch_net::{Request, Response};
use serde::Serialize;

/// A fetch issued by a page and routed through the worker.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The page's request.
    pub request: Request,

    /// Client ID.
    pub client_id: Option<String>,

    /// Is navigation request.
    pub is_navigation: bool,
}

impl FetchEvent {
    /// Subresource fetch.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
            is_navigation: false,
        }
    }

    /// Top-level navigation.
    pub fn navigation(request: Request) -> Self {
        Self {
            is_navigation: true,
            ..Self::new(request)
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// Current bucket hit.
    Cache,
    /// Live network response.
    Network,
    /// Offline fallback document.
    Fallback,
}

/// The worker's answer to a fetch event.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchResponse {
    pub fn from_cache(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }

    pub fn from_network(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    pub fn fallback(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Fallback,
        }
    }

    pub fn is_from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}
