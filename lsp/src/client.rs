//! Protocol client: one bidirectional JSON-RPC session with a subprocess.
//!
//! Responses are matched to calls strictly by request id through a pending
//! map of single-slot channels; "next available response" is never correct
//! when multiple calls are in flight. A dedicated reader task resolves slots
//! as frames arrive; when the stream dies, every outstanding call fails with
//! a transport error.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use codemap_types::{ProtocolError, TransportError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{self, Notification, Request};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

enum WriterCommand {
    Send(serde_json::Value),
    Close,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
    },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id_val), None, true) => Some(IncomingFrame::Response {
            id: id_val.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id_val), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id_val.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification { method }),
        _ => None,
    }
}

/// Client half of one language-server session.
///
/// Owns the reader and writer tasks for the session's byte streams; the
/// subprocess handle itself stays with the pool.
pub struct ProtocolClient {
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: AtomicU64,
    pending: PendingMap,
    shutdown_sent: AtomicBool,
    #[allow(dead_code)]
    reader_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: tokio::task::JoinHandle<()>,
}

impl ProtocolClient {
    /// Wire a client to an arbitrary byte stream pair. Production passes the
    /// subprocess stdout/stdin; tests pass an in-memory duplex.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("LSP write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Close => break,
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(&frame, &reader_pending, &reader_writer_tx).await;
                    }
                    Ok(None) => {
                        tracing::debug!("language server closed its output stream");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("LSP read error: {e}");
                        break;
                    }
                }
            }
            // Dropping the slots fails every call still waiting on this
            // session.
            reader_pending.lock().await.clear();
        });

        Self {
            writer_tx,
            next_id: AtomicU64::new(0),
            pending,
            shutdown_sent: AtomicBool::new(false),
            reader_handle,
            writer_handle,
        }
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        pending: &Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
        writer_tx: &mpsc::Sender<WriterCommand>,
    ) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!("ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                let slot = pending.lock().await.remove(&id);
                if let Some(tx) = slot {
                    let _ = tx.send(body);
                } else {
                    tracing::trace!(id, "response for unknown or abandoned request");
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // Servers block waiting for replies to client/registerCapability,
                // workspace/configuration and friends; answer method-not-found.
                tracing::debug!(%method, "replying method-not-found to server request");
                let response = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("Method not found: {method}")
                    }
                });
                let _ = writer_tx.send(WriterCommand::Send(response)).await;
            }
            IncomingFrame::Notification { method } => {
                tracing::trace!(%method, "ignoring server notification");
            }
        }
    }

    /// Send one request and wait for its id-matched response.
    ///
    /// Returns the `result` member; a JSON-RPC error response surfaces as
    /// [`TransportError::Rpc`].
    async fn request(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .map_err(ProtocolError::MalformedBody)?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::StreamClosed);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(body)) => {
                if let Some(error) = body.get("error") {
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error");
                    return Err(TransportError::Rpc(message.to_string()));
                }
                Ok(body.get("result").cloned().unwrap_or(serde_json::Value::Null))
            }
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::StreamClosed)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(ProtocolError::MalformedBody)?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    /// Perform the initialize handshake for a workspace root.
    pub async fn initialize(&self, root_uri: &str) -> Result<(), TransportError> {
        self.request("initialize", Some(protocol::initialize_params(root_uri)))
            .await?;
        self.notify("initialized", Some(serde_json::json!({}))).await
    }

    /// Request the flat symbol list for one document. A `null` result is an
    /// empty list, not an error.
    pub async fn document_symbols(
        &self,
        uri: &str,
    ) -> Result<Vec<serde_json::Value>, TransportError> {
        let result = self
            .request(
                "textDocument/documentSymbol",
                Some(protocol::document_symbol_params(uri)),
            )
            .await?;
        Ok(result_as_list(result))
    }

    pub async fn references(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<serde_json::Value>, TransportError> {
        let result = self
            .request(
                "textDocument/references",
                Some(protocol::references_params(uri, line, character)),
            )
            .await?;
        Ok(result_as_list(result))
    }

    pub async fn implementation(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<serde_json::Value>, TransportError> {
        let result = self
            .request(
                "textDocument/implementation",
                Some(protocol::implementation_params(uri, line, character)),
            )
            .await?;
        Ok(result_as_list(result))
    }

    /// Send the shutdown request and close the transport.
    ///
    /// Safe to call more than once; repeat calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shutdown_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        let polite = tokio::time::timeout(SHUTDOWN_REQUEST_TIMEOUT, self.request("shutdown", None));
        if matches!(polite.await, Ok(Ok(_))) {
            let _ = self.notify("exit", None).await;
        }

        let _ = self.writer_tx.send(WriterCommand::Close).await;
    }
}

fn result_as_list(result: serde_json::Value) -> Vec<serde_json::Value> {
    match result {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => Vec::new(),
        other => {
            tracing::debug!("expected array result, got {other}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    /// Spawn a scripted server on the far end of a duplex pipe.
    ///
    /// The handler receives each incoming frame and returns any frames to
    /// send back (possibly none, possibly several).
    fn scripted_server<F>(stream: DuplexStream, mut handler: F)
    where
        F: FnMut(serde_json::Value) -> Vec<serde_json::Value> + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        tokio::spawn(async move {
            let mut reader = FrameReader::new(read_half);
            let mut writer = FrameWriter::new(write_half);
            while let Ok(Some(frame)) = reader.read_frame().await {
                for reply in handler(frame) {
                    if writer.write_frame(&reply).await.is_err() {
                        return;
                    }
                }
            }
        });
    }

    fn connected_client<F>(handler: F) -> ProtocolClient
    where
        F: FnMut(serde_json::Value) -> Vec<serde_json::Value> + Send + 'static,
    {
        let (client_end, server_end) = duplex(64 * 1024);
        scripted_server(server_end, handler);
        let (read_half, write_half) = tokio::io::split(client_end);
        ProtocolClient::new(read_half, write_half)
    }

    fn ok_response(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
    }

    #[tokio::test]
    async fn responses_resolve_by_id_not_arrival_order() {
        // Echo each request's own id back in the result; if correlation were
        // positional this would still pass, so additionally delay the first
        // response behind the second.
        let client = Arc::new(connected_client(|frame| {
            let id = frame["id"].as_u64().unwrap();
            if id == 1 {
                // Hold the first response; the test sends it via request 2's
                // handler below instead.
                vec![]
            } else {
                vec![
                    ok_response(&frame["id"], serde_json::json!([{ "echo": 2 }])),
                    serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": [{ "echo": 1 }] }),
                ]
            }
        }));

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.document_symbols("file:///one.py").await })
        };
        // Make sure request 1 is on the wire before request 2.
        tokio::task::yield_now().await;
        let second = client.document_symbols("file:///two.py").await.unwrap();

        assert_eq!(second[0]["echo"], 2);
        let first = first.await.unwrap().unwrap();
        assert_eq!(first[0]["echo"], 1);
    }

    #[tokio::test]
    async fn position_requests_carry_method_and_position() {
        let client = connected_client(|frame| {
            let method = frame["method"].as_str().unwrap_or_default().to_owned();
            let position = frame["params"]["position"].clone();
            vec![ok_response(
                &frame["id"],
                serde_json::json!([{ "method": method, "position": position }]),
            )]
        });

        let refs = client.references("file:///a.py", 4, 7).await.unwrap();
        assert_eq!(refs[0]["method"], "textDocument/references");
        assert_eq!(refs[0]["position"], serde_json::json!({ "line": 4, "character": 7 }));

        let impls = client.implementation("file:///a.py", 9, 0).await.unwrap();
        assert_eq!(impls[0]["method"], "textDocument/implementation");
        assert_eq!(impls[0]["position"], serde_json::json!({ "line": 9, "character": 0 }));
    }

    #[tokio::test]
    async fn null_result_is_empty_symbol_list() {
        let client = connected_client(|frame| {
            vec![ok_response(&frame["id"], serde_json::Value::Null)]
        });
        let symbols = client.document_symbols("file:///a.py").await.unwrap();
        assert!(symbols.is_empty());
    }

    #[tokio::test]
    async fn error_response_surfaces_as_rpc_error() {
        let client = connected_client(|frame| {
            vec![serde_json::json!({
                "jsonrpc": "2.0",
                "id": frame["id"],
                "error": { "code": -32602, "message": "no such document" }
            })]
        });
        let err = client.document_symbols("file:///a.py").await.unwrap_err();
        assert!(matches!(err, TransportError::Rpc(msg) if msg.contains("no such document")));
    }

    #[tokio::test]
    async fn stream_close_fails_outstanding_calls() {
        let (client_end, server_end) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client_end);
        let client = Arc::new(ProtocolClient::new(read_half, write_half));

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.document_symbols("file:///a.py").await })
        };
        tokio::task::yield_now().await;

        drop(server_end);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed));
    }

    #[tokio::test]
    async fn server_request_gets_method_not_found() {
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        let client = connected_client(move |frame| {
            if frame["method"] == "initialize" {
                vec![
                    // Ask something of the client before answering.
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": 99,
                        "method": "client/registerCapability",
                        "params": {}
                    }),
                    ok_response(&frame["id"], serde_json::json!({ "capabilities": {} })),
                ]
            } else if frame.get("id").is_some() && frame.get("error").is_some() {
                reply_tx.send(frame).unwrap();
                vec![]
            } else {
                vec![]
            }
        });

        client.initialize("file:///workspace").await.unwrap();
        // Let the reader task process the server request.
        tokio::task::yield_now().await;

        let reply = reply_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(reply["id"], 99);
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notifications_do_not_disturb_pending_calls() {
        let client = connected_client(|frame| {
            vec![
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "window/logMessage",
                    "params": { "type": 3, "message": "indexing" }
                }),
                ok_response(&frame["id"], serde_json::json!([])),
            ]
        });
        let symbols = client.document_symbols("file:///a.py").await.unwrap();
        assert!(symbols.is_empty());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let client = connected_client(|frame| {
            if frame.get("id").is_some() {
                vec![ok_response(&frame["id"], serde_json::Value::Null)]
            } else {
                vec![]
            }
        });
        client.shutdown().await;
        client.shutdown().await;
    }

    #[tokio::test]
    async fn request_ids_strictly_increase() {
        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        let client = connected_client(move |frame| {
            seen_tx.send(frame["id"].as_u64().unwrap()).unwrap();
            vec![ok_response(&frame["id"], serde_json::json!([]))]
        });

        for _ in 0..3 {
            client.document_symbols("file:///a.py").await.unwrap();
        }

        let ids: Vec<u64> = (0..3).map(|_| seen_rx.recv().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
