//! Rate limiting middleware.
//!
//! Wraps one route with one policy. Each request is turned into an
//! [`Admission`] by the shared [`AdmissionController`], and every variant has
//! its own branch: continue with quota headers, short-circuit with 429,
//! continue bare on a failed-open store, or refuse with 503 on a failed-closed
//! store.

use std::future::{Ready, ready};
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderMap, HeaderName, HeaderValue},
};
use futures::future::LocalBoxFuture;

use tollgate_core::domain::RateLimitPolicy;
use tollgate_core::{Admission, AdmissionController, Quota};
use tollgate_shared::{ErrorResponse, headers};

use crate::observability::RequestId;

/// Client identifier used when no address is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Where the client identifier comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientIdSource {
    /// TCP peer address.
    #[default]
    PeerAddr,
    /// First hop of `Forwarded` / `X-Forwarded-For`, falling back to the peer
    /// when the hop is not an IP address. Only safe behind a proxy that
    /// overwrites these headers.
    Forwarded,
}

impl ClientIdSource {
    pub fn client_id(&self, req: &ServiceRequest) -> String {
        let peer = || req.peer_addr().map(|addr| addr.ip());
        let ip = match self {
            Self::PeerAddr => peer(),
            Self::Forwarded => req
                .connection_info()
                .realip_remote_addr()
                .and_then(host_ip)
                .or_else(peer),
        };

        ip.map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// One bucket per host, regardless of source port. Obfuscated identifiers
/// such as `_hidden` or `unknown` yield `None`.
fn host_ip(addr: &str) -> Option<IpAddr> {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Some(socket.ip());
    }
    addr.trim_matches(['[', ']']).parse::<IpAddr>().ok()
}

/// Rate limiting middleware factory.
pub struct RateLimitMiddleware {
    admission: Arc<AdmissionController>,
    policy: Arc<RateLimitPolicy>,
    client_ids: ClientIdSource,
}

impl RateLimitMiddleware {
    pub fn new(
        admission: Arc<AdmissionController>,
        policy: Arc<RateLimitPolicy>,
        client_ids: ClientIdSource,
    ) -> Self {
        Self {
            admission,
            policy,
            client_ids,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            admission: self.admission.clone(),
            policy: self.policy.clone(),
            client_ids: self.client_ids,
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    admission: Arc<AdmissionController>,
    policy: Arc<RateLimitPolicy>,
    client_ids: ClientIdSource,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let admission = Arc::clone(&self.admission);
        let policy = Arc::clone(&self.policy);
        let client_id = self.client_ids.client_id(&req);

        // The store call suspends this request only; the worker keeps serving others.
        Box::pin(async move {
            match admission.admit(&policy, &client_id).await {
                Admission::Allowed(quota) => {
                    tracing::debug!(
                        policy = %quota.policy,
                        client = %client_id,
                        remaining = quota.remaining,
                        "Request admitted"
                    );

                    let mut res = service.call(req).await?;
                    insert_quota_headers(res.headers_mut(), &quota);
                    Ok(res.map_into_left_body())
                }
                Admission::Denied { retry_after } => {
                    tracing::warn!(
                        policy = %policy.name(),
                        client = %client_id,
                        retry_after_secs = retry_after.as_secs(),
                        "Rate limit exceeded"
                    );

                    Ok(too_many_requests(req, retry_after).map_into_right_body())
                }
                Admission::FailedOpen(err) => {
                    tracing::error!(
                        policy = %policy.name(),
                        client = %client_id,
                        error = %err,
                        "Bucket store failed, failing open"
                    );

                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Admission::FailedClosed(err) => {
                    tracing::error!(
                        policy = %policy.name(),
                        client = %client_id,
                        error = %err,
                        "Bucket store failed, failing closed"
                    );

                    Ok(store_unavailable(req).map_into_right_body())
                }
            }
        })
    }
}

fn insert_quota_headers(map: &mut HeaderMap, quota: &Quota) {
    map.insert(
        HeaderName::from_static(headers::RATE_LIMIT_LIMIT),
        HeaderValue::from(quota.limit),
    );
    map.insert(
        HeaderName::from_static(headers::RATE_LIMIT_REMAINING),
        HeaderValue::from(quota.remaining),
    );
    if let Ok(policy) = HeaderValue::from_str(&quota.policy) {
        map.insert(HeaderName::from_static(headers::RATE_LIMIT_POLICY), policy);
    }
}

/// Problem body carrying the request path and id, if one was assigned.
fn problem(req: &ServiceRequest, error: ErrorResponse) -> ErrorResponse {
    let error = error.with_instance(req.path());
    match req.extensions().get::<RequestId>() {
        Some(id) => error.with_request_id(id.as_str()),
        None => error,
    }
}

fn too_many_requests(req: ServiceRequest, retry_after: Duration) -> ServiceResponse {
    let retry_after_secs = retry_after.as_secs();
    let body = problem(&req, ErrorResponse::too_many_requests(retry_after_secs));

    let response = HttpResponse::TooManyRequests()
        .insert_header((headers::RATE_LIMIT_LIMIT, "0"))
        .insert_header((headers::RATE_LIMIT_REMAINING, "0"))
        .insert_header((headers::RETRY_AFTER, retry_after_secs.to_string()))
        .json(body);

    let (http_req, _payload) = req.into_parts();
    ServiceResponse::new(http_req, response)
}

fn store_unavailable(req: ServiceRequest) -> ServiceResponse {
    let body = problem(
        &req,
        ErrorResponse::service_unavailable("Rate limiting is temporarily unavailable."),
    );

    let response = HttpResponse::ServiceUnavailable()
        .insert_header((headers::RETRY_AFTER, "1"))
        .json(body);

    let (http_req, _payload) = req.into_parts();
    ServiceResponse::new(http_req, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, http::StatusCode, test, web};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tollgate_core::ports::{
        BucketStore, ManualClock, RateLimitError, RateLimitResult,
    };
    use tollgate_core::{AdmissionConfig, FailureMode};
    use tollgate_infra::InMemoryBucketStore;

    struct UnreachableStore;

    #[async_trait]
    impl BucketStore for UnreachableStore {
        async fn try_consume(
            &self,
            _key: &str,
            _policy: &RateLimitPolicy,
            _now_epoch_secs: u64,
            _requested: u32,
        ) -> Result<RateLimitResult, RateLimitError> {
            Err(RateLimitError::StoreUnavailable(
                "connection refused".to_string(),
            ))
        }

        fn backend(&self) -> &'static str {
            "unreachable"
        }
    }

    fn admission(
        store: Arc<dyn BucketStore>,
        clock: Arc<ManualClock>,
        failure_mode: FailureMode,
    ) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(
            store,
            clock,
            AdmissionConfig {
                failure_mode,
                ..AdmissionConfig::default()
            },
        ))
    }

    fn policy() -> Arc<RateLimitPolicy> {
        Arc::new(RateLimitPolicy::new("checkout", 5, 2, 10).unwrap())
    }

    fn get(peer: &str) -> test::TestRequest {
        test::TestRequest::get()
            .uri("/")
            .peer_addr(peer.parse().unwrap())
    }

    fn header<'a, B>(res: &'a ServiceResponse<B>, name: &str) -> Option<&'a str> {
        res.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[actix_web::test]
    async fn test_admits_then_rejects_then_recovers() {
        let clock = Arc::new(ManualClock::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(
                    admission(
                        Arc::new(InMemoryBucketStore::new()),
                        clock.clone(),
                        FailureMode::Open,
                    ),
                    policy(),
                    ClientIdSource::PeerAddr,
                ))
                .route(
                    "/",
                    web::get().to(move || {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            HttpResponse::Ok().body("upstream")
                        }
                    }),
                ),
        )
        .await;

        for remaining in ["4", "3", "2", "1", "0"] {
            let res = test::call_service(&app, get("10.0.0.1:4000").to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(header(&res, "X-RateLimit-Limit"), Some("5"));
            assert_eq!(header(&res, "X-RateLimit-Remaining"), Some(remaining));
            assert_eq!(header(&res, "X-RateLimit-Policy"), Some("checkout"));
            assert_eq!(header(&res, "Retry-After"), None);
        }

        clock.set(1);
        let res = test::call_service(&app, get("10.0.0.1:4001").to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&res, "X-RateLimit-Limit"), Some("0"));
        assert_eq!(header(&res, "X-RateLimit-Remaining"), Some("0"));
        assert_eq!(header(&res, "Retry-After"), Some("9"));
        assert_eq!(header(&res, "X-RateLimit-Policy"), None);

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["status"], 429);
        assert_eq!(body["detail"], "Rate limit exceeded. Try again in 9 seconds.");
        assert_eq!(hits.load(Ordering::SeqCst), 5);

        clock.set(10);
        let res = test::call_service(&app, get("10.0.0.1:4002").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header(&res, "X-RateLimit-Remaining"), Some("1"));
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }

    #[actix_web::test]
    async fn test_clients_have_separate_buckets() {
        let clock = Arc::new(ManualClock::new(0));
        let single = Arc::new(RateLimitPolicy::new("single", 1, 1, 60).unwrap());
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(
                    admission(
                        Arc::new(InMemoryBucketStore::new()),
                        clock,
                        FailureMode::Open,
                    ),
                    single,
                    ClientIdSource::PeerAddr,
                ))
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let res = test::call_service(&app, get("10.0.0.1:4000").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = test::call_service(&app, get("10.0.0.1:4000").to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let res = test::call_service(&app, get("10.0.0.2:4000").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_store_failure_forwards_without_headers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(
                    admission(
                        Arc::new(UnreachableStore),
                        Arc::new(ManualClock::new(0)),
                        FailureMode::Open,
                    ),
                    policy(),
                    ClientIdSource::PeerAddr,
                ))
                .route(
                    "/",
                    web::get().to(move || {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            HttpResponse::Ok().finish()
                        }
                    }),
                ),
        )
        .await;

        for _ in 0..10 {
            let res = test::call_service(&app, get("10.0.0.1:4000").to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(header(&res, "X-RateLimit-Limit"), None);
            assert_eq!(header(&res, "X-RateLimit-Remaining"), None);
            assert_eq!(header(&res, "X-RateLimit-Policy"), None);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[actix_web::test]
    async fn test_store_failure_refuses_when_failing_closed() {
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(
                    admission(
                        Arc::new(UnreachableStore),
                        Arc::new(ManualClock::new(0)),
                        FailureMode::Closed,
                    ),
                    policy(),
                    ClientIdSource::PeerAddr,
                ))
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let res = test::call_service(&app, get("10.0.0.1:4000").to_request()).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(header(&res, "Retry-After"), Some("1"));
    }

    #[actix_web::test]
    async fn test_forwarded_client_id_uses_first_hop() {
        let req = test::TestRequest::get()
            .uri("/")
            .peer_addr("10.0.0.254:5000".parse().unwrap())
            .insert_header(("X-Forwarded-For", "203.0.113.9, 10.0.0.254"))
            .to_srv_request();

        assert_eq!(ClientIdSource::Forwarded.client_id(&req), "203.0.113.9");
        assert_eq!(ClientIdSource::PeerAddr.client_id(&req), "10.0.0.254");
    }

    #[actix_web::test]
    async fn test_missing_peer_is_unknown() {
        let req = test::TestRequest::get().uri("/").to_srv_request();
        assert_eq!(ClientIdSource::PeerAddr.client_id(&req), UNKNOWN_CLIENT);
    }

    #[actix_web::test]
    async fn test_forwarded_non_ip_hop_falls_back_to_peer() {
        let req = test::TestRequest::get()
            .uri("/")
            .peer_addr("10.0.0.254:5000".parse().unwrap())
            .insert_header(("X-Forwarded-For", "not-an-ip"))
            .to_srv_request();
        assert_eq!(ClientIdSource::Forwarded.client_id(&req), "10.0.0.254");

        let req = test::TestRequest::get()
            .uri("/")
            .insert_header(("Forwarded", "for=_hidden"))
            .to_srv_request();
        assert_eq!(ClientIdSource::Forwarded.client_id(&req), UNKNOWN_CLIENT);
    }

    #[actix_web::test]
    async fn test_host_ip() {
        let ip = |s: &str| host_ip(s).map(|ip| ip.to_string());
        assert_eq!(ip("203.0.113.9:443").as_deref(), Some("203.0.113.9"));
        assert_eq!(ip("[2001:db8::1]:8080").as_deref(), Some("2001:db8::1"));
        assert_eq!(ip("[2001:db8::1]").as_deref(), Some("2001:db8::1"));
        assert_eq!(ip("2001:db8::1").as_deref(), Some("2001:db8::1"));
        assert_eq!(ip("_hidden"), None);
        assert_eq!(ip("unknown"), None);
    }
}
