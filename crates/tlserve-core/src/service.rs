//! Service trait implemented by request handlers.

use crate::request::Request;
use crate::response::Response;

/// A request handler registered under an exact first path segment.
///
/// The engine routes `GET /files/a.txt` to the service registered for
/// `/files`, leaving `/a.txt` in [`Request::sub_path`] for the handler to
/// resolve. Unmatched paths receive the stock `404 Not Found` reply.
///
/// Handlers run synchronously on the connection's worker; panics are not
/// caught by the engine.
pub trait Service: Send + Sync {
    /// Handle one parsed request by populating the response.
    fn handle_request(&self, request: &Request, response: &mut Response);
}
