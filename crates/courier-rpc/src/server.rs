use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error};

use crate::frame::{self, FrameError};
use crate::{Request, Response, RpcError};

/// The handler seam a node exposes over RPC.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Accept loop: one task per connection, requests on a connection handled in
/// order. Runs until the task is cancelled.
pub async fn serve<S: Service>(listener: TcpListener, service: Arc<S>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("rpc: connection from {}", addr);
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, service).await {
                        debug!("rpc: connection from {} ended: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("rpc: accept error: {}", e);
            }
        }
    }
}

/// Serve one established connection. Sequential handling preserves the
/// sender's submission order through to the dispatch tier.
pub async fn handle_connection<S: Service>(
    stream: TcpStream,
    service: Arc<S>,
) -> Result<(), RpcError> {
    let sock_ref = socket2::SockRef::from(&stream);
    let _ = sock_ref.set_nodelay(true);

    let (mut reader, mut writer) = stream.into_split();

    loop {
        let body = match frame::read_frame(&mut reader).await {
            Ok(body) => body,
            // Clean disconnect between frames.
            Err(FrameError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let request: Request = serde_json::from_slice(&body)?;
        let response = match service.call(&request.method, request.params).await {
            Ok(result) => Response {
                id: request.id,
                result: Some(result),
                error: None,
            },
            Err(e) => Response {
                id: request.id,
                result: None,
                error: Some(e.to_string()),
            },
        };

        let body = serde_json::to_vec(&response)?;
        frame::write_frame(&mut writer, &body).await?;
    }
}
