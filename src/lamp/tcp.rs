// lamp/tcp.rs
use std::collections::HashMap;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{BatchReport, LampClient};
use crate::error::LampError;
use crate::scene::{Batch, Command};

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct Reply {
    id: Option<u64>,
    error: Option<ReplyError>,
}

#[derive(Deserialize)]
struct ReplyError {
    code: i64,
    message: String,
}

/// JSON-line TCP session against one lamp endpoint. Every command in the
/// batch is written before any reply is read, replies are matched by id in
/// whatever order the lamp produces them, and the session is closed only
/// once every command has settled.
pub struct TcpLampClient;

#[async_trait::async_trait]
impl LampClient for TcpLampClient {
    async fn apply_batch(&self, batch: &Batch) -> Result<BatchReport, LampError> {
        let endpoint = batch.endpoint;
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|source| LampError::Connection { endpoint, source })?;
        debug!(%endpoint, commands = batch.commands.len(), "lamp session open");
        let (reader, mut writer) = stream.into_split();

        let mut report = BatchReport::default();
        let mut outstanding: HashMap<u64, &Command> = HashMap::new();
        for (index, command) in batch.commands.iter().enumerate() {
            let id = index as u64 + 1;
            let request = Request {
                id,
                method: command.method,
                params: &command.params,
            };
            let mut line =
                serde_json::to_string(&request).map_err(|source| LampError::Encode {
                    method: command.method.to_string(),
                    source,
                })?;
            line.push_str("\r\n");
            if let Err(error) = writer.write_all(line.as_bytes()).await {
                warn!(%endpoint, method = command.method, %error, "lamp command send failed");
                // the session is gone; commands never issued settle as failed
                report.failed += batch.commands.len() - index;
                break;
            }
            outstanding.insert(id, command);
        }

        let mut lines = BufReader::new(reader).lines();
        while !outstanding.is_empty() {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Ok(reply) = serde_json::from_str::<Reply>(&line) else {
                        debug!(%endpoint, %line, "unparseable lamp reply dropped");
                        continue;
                    };
                    // lines without a matching id are prop-change notifications
                    let Some(command) = reply.id.and_then(|id| outstanding.remove(&id)) else {
                        continue;
                    };
                    match reply.error {
                        Some(error) => {
                            warn!(
                                %endpoint,
                                method = command.method,
                                params = %serde_json::Value::from(command.params.clone()),
                                code = error.code,
                                message = %error.message,
                                "lamp rejected command"
                            );
                            counter!("lamp_command_failures_total").increment(1);
                            report.failed += 1;
                        }
                        None => report.succeeded += 1,
                    }
                }
                Ok(None) => {
                    warn!(%endpoint, unsettled = outstanding.len(), "lamp closed the session early");
                    report.failed += outstanding.len();
                    break;
                }
                Err(error) => {
                    warn!(%endpoint, unsettled = outstanding.len(), %error, "lamp session read failed");
                    report.failed += outstanding.len();
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
        debug!(%endpoint, ?report, "lamp session closed");
        Ok(report)
    }
}
