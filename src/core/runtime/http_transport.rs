use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method as ReqwestMethod;

use crate::http::{Method, Request, Response};
use crate::runtime::NetworkTransport;

/// [`NetworkTransport`] backed by `reqwest`. Non-2xx responses are
/// translated into an ordinary [`Response`] rather than an error —
/// only transport-level failures (DNS, connection refused, timeout)
/// surface as `Err`, matching the design doc's contract for `fetch`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn to_reqwest_method(method: Method) -> ReqwestMethod {
    match method {
        Method::Get => ReqwestMethod::GET,
        Method::Head => ReqwestMethod::HEAD,
        Method::Options => ReqwestMethod::OPTIONS,
        Method::Other => ReqwestMethod::GET,
    }
}

#[async_trait]
impl NetworkTransport for ReqwestTransport {
    async fn fetch(&self, req: &Request) -> anyhow::Result<Response> {
        let resp = self
            .client
            .request(to_reqwest_method(req.method), &req.url)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = resp.bytes().await?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
