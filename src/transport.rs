// ===============================
// src/transport.rs
// ===============================
//
// Satu jalur HTTP ke Aster futures REST:
// - call()       : request signed (recvWindow + timestamp + nonce + signature)
// - get_public() : market-data read tanpa tanda tangan
//
// Retry hanya untuk 429 / 5xx, backoff linear (base * attempt). Payload yang
// sudah ditandatangani dikirim ulang apa adanya — idempotent di sisi kita,
// validitas window diputuskan exchange dari recvWindow + timestamp.
// Status >= 400 lain langsung jadi error dengan method/path/status/body.
// Tidak ada circuit breaking di layer ini; rem frekuensi ada di engine.
//
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::config::{Args, Credentials};
use crate::metrics::API_RETRIES;
use crate::signer::{self, RequestSigner, SignError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{method} {path} -> {status}: {body}")]
    Client {
        method: String,
        path: String,
        status: u16,
        body: String,
    },
    #[error("{method} {path} retries exhausted, last {status}: {body}")]
    RetriesExhausted {
        method: String,
        path: String,
        status: u16,
        body: String,
    },
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("unexpected payload shape: {0}")]
    Payload(&'static str),
    #[error("instrument {0} not found in exchangeInfo")]
    UnknownInstrument(String),
}

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    user: String,
    signer_addr: String,
    signer: RequestSigner,
    recv_window: u64,
    max_retry: u32,
    backoff: Duration,
}

impl ApiClient {
    pub fn new(args: &Args, creds: &Credentials) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(args.timeout_s))
            .build()?;
        let signer = RequestSigner::new(&creds.user, &creds.signer, &creds.priv_key)?;
        Ok(Self {
            http,
            base: format!("{}/fapi/v3", args.rest_url.trim_end_matches('/')),
            api_key: creds.api_key.clone(),
            user: creds.user.clone(),
            signer_addr: creds.signer.clone(),
            signer,
            recv_window: args.recv_window,
            max_retry: args.max_retry.max(1),
            backoff: Duration::from_millis(args.backoff_ms),
        })
    }

    /// Request signed. recvWindow + timestamp masuk SEBELUM canonicalization,
    /// sama seperti kontrak exchange.
    pub async fn call(&self, method: Method, path: &str, params: Value) -> Result<Value, ApiError> {
        let mut fields = signer::trim_params(&params)?;
        fields.insert("recvWindow".to_string(), self.recv_window.to_string());
        fields.insert("timestamp".to_string(), signer::timestamp_ms().to_string());

        let canonical = signer::canonical_string(&fields)?;
        let nonce = self.signer.next_nonce();
        let signature = self.signer.sign(&canonical, nonce)?;

        fields.insert("nonce".to_string(), nonce.to_string());
        fields.insert("user".to_string(), self.user.clone());
        fields.insert("signer".to_string(), self.signer_addr.clone());
        fields.insert("signature".to_string(), signature);

        let pairs: Vec<(String, String)> = fields.into_iter().collect();
        self.send_with_retry(method, path, &pairs).await
    }

    /// Market-data read tanpa tanda tangan, retry policy sama.
    pub async fn get_public(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let pairs: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.send_with_retry(Method::GET, path, &pairs).await
    }

    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        fields: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base, path);
        let mut last: Option<(u16, String)> = None;

        for attempt in 1..=self.max_retry {
            let mut req = self.http.request(method.clone(), &url);
            req = if method == Method::GET {
                req.query(fields)
            } else {
                req.form(fields)
            };
            let resp = req.header("X-MBX-APIKEY", &self.api_key).send().await?;
            let status = resp.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = resp.text().await.unwrap_or_default();
                last = Some((status.as_u16(), body));
                if attempt < self.max_retry {
                    let wait = self.backoff * attempt;
                    warn!(
                        status = status.as_u16(),
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        %path,
                        "transient API error, backing off"
                    );
                    API_RETRIES.inc();
                    sleep(wait).await;
                }
                continue;
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ApiError::Client {
                    method: method.to_string(),
                    path: path.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }

            return Ok(resp.json::<Value>().await?);
        }

        let (status, body) = last.unwrap_or((0, String::new()));
        Err(ApiError::RetriesExhausted {
            method: method.to_string(),
            path: path.to_string(),
            status,
            body,
        })
    }
}
