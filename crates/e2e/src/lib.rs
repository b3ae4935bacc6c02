//! Harness shared by the smoke tests: in-process servers, a stand-in completions API and a
//! capturing tracing subscriber.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.send(()).ok();
        let _ = self.task.await;
    }
}

/// Serves `app` on an ephemeral loopback port with peer addresses available to handlers.
pub async fn spawn_server(app: Router) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    RunningServer {
        addr,
        shutdown: shutdown_tx,
        task,
    }
}

/// A captured call to the stand-in completions API.
#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct CompletionsState {
    reply: Option<String>,
    calls: Arc<Mutex<Vec<CompletionCall>>>,
}

/// Chat-completions stand-in. Answers every call with `reply`, or with a 502 when `reply` is
/// `None`.
pub async fn spawn_completions_api(
    reply: Option<&str>,
) -> (RunningServer, Arc<Mutex<Vec<CompletionCall>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let state = CompletionsState {
        reply: reply.map(str::to_string),
        calls: calls.clone(),
    };

    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);

    (spawn_server(app).await, calls)
}

async fn chat_completions(
    State(state): State<CompletionsState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state
        .calls
        .lock()
        .expect("calls lock should be available")
        .push(CompletionCall {
            authorization,
            body,
        });

    match state.reply {
        Some(reply) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": "chatcmpl-e2e",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": reply },
                    "finish_reason": "stop"
                }]
            })),
        ),
        None => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": { "message": "upstream unavailable" } })),
        ),
    }
}

struct TestWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut lock = self
            .buf
            .lock()
            .map_err(|_| std::io::Error::other("log mutex poisoned"))?;
        lock.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Installs a process-wide subscriber that writes into an in-memory buffer.
pub fn init_test_tracing() -> Arc<Mutex<Vec<u8>>> {
    static LOG_BUF: OnceLock<Arc<Mutex<Vec<u8>>>> = OnceLock::new();

    LOG_BUF
        .get_or_init(|| {
            let buf = Arc::new(Mutex::new(Vec::new()));
            let make_writer = {
                let buf = buf.clone();
                move || TestWriter { buf: buf.clone() }
            };

            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .with_ansi(false)
                .with_writer(make_writer)
                .finish();

            tracing::subscriber::set_global_default(subscriber)
                .expect("global tracing subscriber should be set once");

            buf
        })
        .clone()
}

pub fn captured_logs(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = buf.lock().expect("log lock should be available").clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
