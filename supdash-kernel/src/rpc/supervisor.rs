//! Transport XML-RPC sur HTTP vers supervisord (`/RPC2`).

use super::xml::{self, Value, XmlRpcError};
use super::{Connector, ControlSession, RpcError};
use crate::models::{Daemon, ProcessState, ProcessStatus};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::error::Error as _;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

/// Fabrique de sessions partageant un pool HTTP
#[derive(Clone)]
pub struct SupervisorConnector {
    http: reqwest::Client,
    timeout: Duration,
}

impl SupervisorConnector {
    pub fn new(timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Connection(describe(&e)))?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl Connector for SupervisorConnector {
    async fn connect(&self, daemon: &Daemon) -> Result<Box<dyn ControlSession>, RpcError> {
        let (endpoint, credentials) = split_credentials(&daemon.endpoint)?;
        debug!(host = %daemon.host, endpoint = %daemon.display_endpoint(), "opening session");
        Ok(Box::new(SupervisorSession { http: self.http.clone(), endpoint, credentials, timeout: self.timeout }))
    }
}

pub struct SupervisorSession {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Option<(String, Option<String>)>,
    timeout: Duration,
}

impl SupervisorSession {
    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "text/xml")
            .body(xml::encode_call(method, params));
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            // pas de réponse protocolaire : on traite comme une panne de transport
            return Err(RpcError::Connection(format!("HTTP {status}")));
        }
        let body = response.text().await.map_err(|e| self.transport_error(&e))?;

        xml::decode_response(&body).map_err(|e| match e {
            XmlRpcError::Fault { code, message } => RpcError::Fault { code, message },
            other => RpcError::Protocol(other.to_string()),
        })
    }

    fn transport_error(&self, err: &reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout(self.timeout)
        } else {
            RpcError::Connection(describe(err))
        }
    }

    async fn control(&self, method: &str, process: &str) -> Result<bool, RpcError> {
        // wait=true : supervisord ne répond qu'une fois la transition terminée
        let result = self.call(method, &[Value::from(process), Value::from(true)]).await?;
        result
            .as_bool()
            .ok_or_else(|| RpcError::Protocol(format!("{method} returned {result:?}")))
    }
}

#[async_trait]
impl ControlSession for SupervisorSession {
    async fn get_status(&mut self, process: &str) -> Result<ProcessStatus, RpcError> {
        let info = self.call("supervisor.getProcessInfo", &[Value::from(process)]).await?;
        process_status(&info)
    }

    async fn start(&mut self, process: &str) -> Result<bool, RpcError> {
        self.control("supervisor.startProcess", process).await
    }

    async fn stop(&mut self, process: &str) -> Result<bool, RpcError> {
        self.control("supervisor.stopProcess", process).await
    }
}

/// Retire user:password de l'URL pour les passer en basic auth
fn split_credentials(url: &Url) -> Result<(Url, Option<(String, Option<String>)>), RpcError> {
    if url.username().is_empty() && url.password().is_none() {
        return Ok((url.clone(), None));
    }
    let credentials = (url.username().to_string(), url.password().map(str::to_string));
    let mut bare = url.clone();
    bare.set_username("")
        .and_then(|_| bare.set_password(None))
        .map_err(|_| RpcError::Connection(format!("cannot strip credentials from {}", url.scheme())))?;
    Ok((bare, Some(credentials)))
}

/// Message d'erreur reqwest avec sa chaîne de causes (ex: "connection refused")
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn process_status(info: &Value) -> Result<ProcessStatus, RpcError> {
    let text = |key: &str| -> Result<String, RpcError> {
        info.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RpcError::Protocol(format!("getProcessInfo: missing {key}")))
    };
    let seconds = |key: &str| -> Result<i64, RpcError> {
        info.get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| RpcError::Protocol(format!("getProcessInfo: missing {key}")))
    };

    let stop = match seconds("stop")? {
        0 => None,
        secs => Some(instant(secs)?),
    };

    Ok(ProcessStatus {
        name: text("name")?,
        group: text("group").ok(),
        start: instant(seconds("start")?)?,
        stop,
        now: instant(seconds("now")?)?,
        state: ProcessState::from_label(&text("statename")?),
        pid: info
            .get("pid")
            .and_then(Value::as_i64)
            .filter(|pid| *pid > 0)
            .and_then(|pid| u32::try_from(pid).ok()),
        description: text("description").ok().filter(|d| !d.is_empty()),
    })
}

fn instant(secs: i64) -> Result<OffsetDateTime, RpcError> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| RpcError::Protocol(format!("bad timestamp {secs}: {e}")))
}
