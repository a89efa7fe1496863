//! Per-request caching strategy selection.

use reqwest::Method;
use url::Url;

/// An HTTP request routed through the resource cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
  pub method: Method,
  pub url: Url,
  /// Navigation request for a page rather than a subresource
  pub document: bool,
  pub body: Option<Vec<u8>>,
}

impl ResourceRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      document: false,
      body: None,
    }
  }

  pub fn document(url: Url) -> Self {
    Self {
      document: true,
      ..Self::get(url)
    }
  }

  /// URL of the root document on the same origin.
  pub fn root_url(&self) -> Url {
    let mut root = self.url.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    root
  }
}

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Straight to the network, nothing stored.
  PassThrough,
  /// Cache-first from the static partition; filled on miss.
  Static,
  /// Network-first; the last good answer is kept for offline use.
  Backend,
  /// Cache-first; misses are fetched into the bounded dynamic partition.
  CacheFirst,
}

/// Pick the strategy for `request`.
///
/// `manifest` is the install manifest; `endpoint` the configured backend.
pub fn classify(request: &ResourceRequest, manifest: &[Url], endpoint: Option<&Url>) -> Strategy {
  if request.method != Method::GET {
    return Strategy::PassThrough;
  }
  if !matches!(request.url.scheme(), "http" | "https") {
    return Strategy::PassThrough;
  }
  if let Some(endpoint) = endpoint {
    if same_resource(&request.url, endpoint) {
      return Strategy::Backend;
    }
  }
  if request.url.path() == "/" || manifest.iter().any(|entry| entry == &request.url) {
    return Strategy::Static;
  }
  Strategy::CacheFirst
}

/// Same origin and path; the query string is ignored.
fn same_resource(a: &Url, b: &Url) -> bool {
  a.scheme() == b.scheme()
    && a.host_str() == b.host_str()
    && a.port_or_known_default() == b.port_or_known_default()
    && a.path() == b.path()
}
