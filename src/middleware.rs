//! Security headers middleware.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};

/// Middleware that adds security headers to all responses.
///
/// The service only answers JSON, so nothing it returns may be cached,
/// framed, sniffed as another type, or leak the page URL via `Referer`:
///
/// - **Cache-Control: no-store**: nonces and sign-in results are single-use.
/// - **Referrer-Policy: no-referrer**
/// - **X-Content-Type-Options: nosniff**
/// - **X-Frame-Options: DENY**
/// - **Strict-Transport-Security**: HTTPS for 2 years, including subdomains.
/// - **Content-Security-Policy**: `default-src 'none'`, no framing.
///
/// # Usage
///
/// ```rust,no_run
/// use axum::Router;
/// use axum::middleware;
/// use wallet_login::middleware::security_headers;
///
/// let app: Router = Router::new()
///     .layer(middleware::from_fn(security_headers));
/// ```
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );

    response
}
