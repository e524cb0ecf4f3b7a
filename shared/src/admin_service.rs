use crate::http::{make_boxed_error_response, make_json_response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Read-only view of the routing state served on the admin listener.
pub trait Inspect: Send + Sync + 'static {
    fn is_ready(&self) -> bool;

    /// Routing decision for `host`, or a description of why it is unresolved.
    fn route(&self, host: &str) -> Result<serde_json::Value, String>;
}

pub struct AdminService<I, E> {
    inspector: Arc<I>,
    _error: PhantomData<fn() -> E>,
}

impl<I, E> AdminService<I, E>
where
    I: Inspect,
{
    pub fn new(inspector: Arc<I>) -> Self {
        Self {
            inspector,
            _error: PhantomData,
        }
    }
}

impl<I, E> Service<Request<Incoming>> for AdminService<I, E>
where
    I: Inspect,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let response = handle(self.inspector.as_ref(), req.uri());
        Box::pin(async move { Ok(response) })
    }
}

fn handle<I: Inspect>(inspector: &I, uri: &http::Uri) -> Response<BoxBody<Bytes, Infallible>> {
    let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

    match uri.path() {
        "/health" => Response::new(ok_body()),
        "/ready" => match inspector.is_ready() {
            true => Response::new(ok_body()),
            false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        },
        "/route" => {
            let host = uri.query().and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == "host")
                    .map(|(_, value)| value.into_owned())
            });

            match host {
                None => make_boxed_error_response(StatusCode::BAD_REQUEST),
                Some(host) => match inspector.route(&host) {
                    Ok(decision) => make_json_response(StatusCode::OK, &decision),
                    Err(error_message) => make_json_response(
                        StatusCode::NOT_FOUND,
                        &serde_json::json!({ "error_message": error_message }),
                    ),
                },
            }
        }
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}
