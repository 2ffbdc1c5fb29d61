//! Operator notifications and human approval.
//!
//! - **[`TelegramNotifier`]** sends messages through the Telegram Bot API and
//!   asks for approval with an inline ✅ Approve / ❌ Decline keyboard.
//! - **[`ConsoleNotifier`]** logs messages and asks for approval on stdin.
//!   Used when `[telegram]` is not configured.
//!
//! # Approval correlation
//!
//! Every approval request registers a fresh UUID token with the
//! [`ApprovalBroker`]; the buttons carry `approve:<token>` and
//! `decline:<token>` as callback data. A background poller reads
//! `getUpdates` while at least one request is pending and routes each
//! callback to the `oneshot` channel of its token, so concurrent requests
//! never see each other's answers. The poller stops as soon as nothing is
//! pending.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::config::TelegramConfig;
use crate::error::ServiceError;
use crate::http;
use crate::traits::Notifier;

const SERVICE: &str = "telegram";
const TELEGRAM_API: &str = "https://api.telegram.org";

pub const TIMEOUT_MESSAGE: &str = "⏱️ Confirmation timeout - operation cancelled";

// ═══════════════════════════════════════════════════════════════════════
// Approval broker
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline,
}

/// Split callback data of the form `approve:<token>` / `decline:<token>`.
pub fn parse_callback_data(data: &str) -> Option<(Decision, &str)> {
    let (verb, token) = data.split_once(':')?;
    let decision = match verb {
        "approve" => Decision::Approve,
        "decline" => Decision::Decline,
        _ => return None,
    };
    if token.is_empty() {
        return None;
    }
    Some((decision, token))
}

/// Maps pending approval tokens to the channel waiting on them.
#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<Decision>>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request. The token goes into the callback data.
    pub fn register(&self) -> (String, oneshot::Receiver<Decision>) {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(token.clone(), tx);
        (token, rx)
    }

    /// Deliver a callback. Returns `false` for unknown or malformed data.
    pub fn resolve(&self, callback_data: &str) -> bool {
        let (decision, token) = match parse_callback_data(callback_data) {
            Some(parsed) => parsed,
            None => return false,
        };
        let sender = self.pending.lock().unwrap().remove(token);
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, token: &str) {
        self.pending.lock().unwrap().remove(token);
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Telegram Bot API
// ═══════════════════════════════════════════════════════════════════════

/// A callback button press read from `getUpdates`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPress {
    pub query_id: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub callback: Option<CallbackPress>,
}

struct TelegramApi {
    base_url: String,
    client: reqwest::Client,
}

impl TelegramApi {
    async fn call(&self, method: &str, body: &Value) -> Result<Value, ServiceError> {
        let url = format!("{}/{}", self.base_url, method);
        let json = http::send_json(SERVICE, self.client.post(&url).json(body)).await?;
        unwrap_result(&json)
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<i64, ServiceError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        let result = self.call("sendMessage", &body).await?;
        result
            .get("message_id")
            .and_then(|m| m.as_i64())
            .ok_or_else(|| ServiceError::malformed(SERVICE, "sendMessage without message_id"))
    }

    async fn edit_message_text(
        &self,
        chat_id: &str,
        message_id: i64,
        text: &str,
    ) -> Result<(), ServiceError> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id, "text": text });
        self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn answer_callback_query(&self, query_id: &str) -> Result<(), ServiceError> {
        self.call("answerCallbackQuery", &json!({ "callback_query_id": query_id }))
            .await?;
        Ok(())
    }

    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ServiceError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["callback_query"],
        });
        let result = self.call("getUpdates", &body).await?;
        parse_updates(&result)
    }
}

/// Unwrap the `{"ok": .., "result": ..}` envelope.
fn unwrap_result(json: &Value) -> Result<Value, ServiceError> {
    if json.get("ok").and_then(|o| o.as_bool()) == Some(true) {
        return Ok(json.get("result").cloned().unwrap_or(Value::Null));
    }
    let description = json
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or("request not ok");
    Err(ServiceError::invalid(SERVICE, description))
}

pub fn parse_updates(result: &Value) -> Result<Vec<Update>, ServiceError> {
    let items = result
        .as_array()
        .ok_or_else(|| ServiceError::malformed(SERVICE, "getUpdates result is not an array"))?;
    let mut updates = Vec::with_capacity(items.len());
    for item in items {
        let update_id = item
            .get("update_id")
            .and_then(|u| u.as_i64())
            .ok_or_else(|| ServiceError::malformed(SERVICE, "update without update_id"))?;
        let callback = item.get("callback_query").and_then(|q| {
            Some(CallbackPress {
                query_id: q.get("id")?.as_str()?.to_string(),
                data: q.get("data")?.as_str()?.to_string(),
            })
        });
        updates.push(Update { update_id, callback });
    }
    Ok(updates)
}

pub fn approval_keyboard(token: &str) -> Value {
    json!({
        "inline_keyboard": [[
            { "text": "✅ Approve", "callback_data": format!("approve:{}", token) },
            { "text": "❌ Decline", "callback_data": format!("decline:{}", token) },
        ]]
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Telegram notifier
// ═══════════════════════════════════════════════════════════════════════

struct Shared {
    api: TelegramApi,
    broker: ApprovalBroker,
    poll_timeout_secs: u64,
    offset: AtomicI64,
    poller_running: Mutex<bool>,
}

pub struct TelegramNotifier {
    shared: Arc<Shared>,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn from_config(config: &TelegramConfig) -> Result<Self, ServiceError> {
        let token = http::api_key_from_env(SERVICE, &config.bot_token_env)?;
        // Long polls must outlive the HTTP timeout.
        let client = http::client(config.poll_timeout_secs + 10)?;
        Ok(Self::new(
            format!("{}/bot{}", TELEGRAM_API, token),
            config.chat_id.clone(),
            config.poll_timeout_secs,
            client,
        ))
    }

    pub fn new(
        base_url: String,
        chat_id: String,
        poll_timeout_secs: u64,
        client: reqwest::Client,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api: TelegramApi { base_url, client },
                broker: ApprovalBroker::new(),
                poll_timeout_secs,
                offset: AtomicI64::new(0),
                poller_running: Mutex::new(false),
            }),
            chat_id,
        }
    }

    fn ensure_poller(&self) {
        let mut running = self.shared.poller_running.lock().unwrap();
        if *running {
            return;
        }
        *running = true;
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { poll_callbacks(shared).await });
    }
}

/// Route callback presses to the broker until nothing is pending.
async fn poll_callbacks(shared: Arc<Shared>) {
    tracing::debug!("approval poller started");
    loop {
        {
            let mut running = shared.poller_running.lock().unwrap();
            if shared.broker.pending() == 0 {
                *running = false;
                break;
            }
        }

        let offset = shared.offset.load(Ordering::SeqCst);
        let updates = match shared.api.get_updates(offset, shared.poll_timeout_secs).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "getUpdates failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        for update in updates {
            shared.offset.fetch_max(update.update_id + 1, Ordering::SeqCst);
            let Some(press) = update.callback else { continue };
            if shared.broker.resolve(&press.data) {
                if let Err(e) = shared.api.answer_callback_query(&press.query_id).await {
                    tracing::debug!(error = %e, "answerCallbackQuery failed");
                }
            } else {
                tracing::debug!(data = %press.data, "ignoring callback for unknown request");
            }
        }
    }
    tracing::debug!("approval poller stopped");
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<(), ServiceError> {
        self.shared.api.send_message(&self.chat_id, text, None).await?;
        Ok(())
    }

    async fn request_approval(&self, text: &str, timeout: Duration) -> Result<bool, ServiceError> {
        let (token, rx) = self.shared.broker.register();

        let message_id = match self
            .shared
            .api
            .send_message(&self.chat_id, text, Some(approval_keyboard(&token)))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.shared.broker.cancel(&token);
                return Err(e);
            }
        };
        self.ensure_poller();

        let approved = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(decision)) => decision == Decision::Approve,
            Ok(Err(_)) => false,
            Err(_) => {
                self.shared.broker.cancel(&token);
                tracing::warn!("approval request timed out");
                if let Err(e) = self.notify(TIMEOUT_MESSAGE).await {
                    tracing::warn!(error = %e, "failed to send timeout notice");
                }
                false
            }
        };

        let status = if approved { "✅ Approved" } else { "❌ Declined" };
        if let Err(e) = self
            .shared
            .api
            .edit_message_text(&self.chat_id, message_id, &format!("{}\n\n{}", text, status))
            .await
        {
            tracing::debug!(error = %e, "could not update approval message");
        }

        Ok(approved)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Console notifier
// ═══════════════════════════════════════════════════════════════════════

/// Logs notifications and asks for approval on the terminal.
///
/// The answer is read on a detached thread. A prompt that times out
/// abandons that read instead of holding up runtime shutdown, and the next
/// line typed on stdin is consumed by it.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, text: &str) -> Result<(), ServiceError> {
        tracing::info!(target: "notify", "{}", text);
        Ok(())
    }

    async fn request_approval(&self, text: &str, timeout: Duration) -> Result<bool, ServiceError> {
        eprintln!("{}", text);
        eprint!("Approve? [y/N] ");

        let line = spawn_line_reader(|buf| std::io::stdin().read_line(buf));
        match await_answer(line, timeout).await? {
            Some(approved) => Ok(approved),
            None => {
                eprintln!();
                self.notify(TIMEOUT_MESSAGE).await?;
                Ok(false)
            }
        }
    }
}

type LineResult = std::io::Result<Option<String>>;

/// Run one blocking line read on its own thread. `None` means end of input.
fn spawn_line_reader<F>(read: F) -> oneshot::Receiver<LineResult>
where
    F: FnOnce(&mut String) -> std::io::Result<usize> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let result = read(&mut line).map(|n| if n == 0 { None } else { Some(line) });
        let _ = tx.send(result);
    });
    rx
}

/// `None` when no answer arrived within `timeout`.
async fn await_answer(
    line: oneshot::Receiver<LineResult>,
    timeout: Duration,
) -> Result<Option<bool>, ServiceError> {
    match tokio::time::timeout(timeout, line).await {
        Ok(Ok(Ok(Some(line)))) => Ok(Some(is_yes(&line))),
        Ok(Ok(Ok(None))) | Ok(Err(_)) => Ok(Some(false)),
        Ok(Ok(Err(e))) => Err(ServiceError::unavailable("console", e.to_string())),
        Err(_) => Ok(None),
    }
}

fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

// ============ Progress ============

pub fn progress_text(current: usize, total: usize, operation: &str) -> String {
    let percentage = if total == 0 {
        0.0
    } else {
        current as f64 / total as f64 * 100.0
    };
    format!(
        "📊 {}\nProgress: {}/{} ({:.1}%)",
        operation, current, total, percentage
    )
}

/// Send a progress message through any notifier.
pub async fn send_progress_update(
    notifier: &dyn Notifier,
    current: usize,
    total: usize,
    operation: &str,
) -> Result<(), ServiceError> {
    notifier
        .notify(&progress_text(current, total, operation))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_round_trip() {
        assert_eq!(parse_callback_data("approve:abc"), Some((Decision::Approve, "abc")));
        assert_eq!(parse_callback_data("decline:abc"), Some((Decision::Decline, "abc")));
        assert_eq!(parse_callback_data("approve"), None);
        assert_eq!(parse_callback_data("approve:"), None);
        assert_eq!(parse_callback_data("maybe:abc"), None);
    }

    #[tokio::test]
    async fn broker_routes_by_token() {
        let broker = ApprovalBroker::new();
        let (first, first_rx) = broker.register();
        let (second, second_rx) = broker.register();
        assert_ne!(first, second);
        assert_eq!(broker.pending(), 2);

        assert!(broker.resolve(&format!("decline:{}", second)));
        assert_eq!(second_rx.await.unwrap(), Decision::Decline);
        assert_eq!(broker.pending(), 1);

        assert!(broker.resolve(&format!("approve:{}", first)));
        assert_eq!(first_rx.await.unwrap(), Decision::Approve);
        assert_eq!(broker.pending(), 0);
    }

    #[test]
    fn broker_ignores_unknown_and_repeated() {
        let broker = ApprovalBroker::new();
        let (token, _rx) = broker.register();
        assert!(!broker.resolve("approve:not-a-token"));
        assert!(!broker.resolve("garbage"));
        assert!(broker.resolve(&format!("approve:{}", token)));
        assert!(!broker.resolve(&format!("approve:{}", token)));
    }

    #[test]
    fn cancel_drops_pending() {
        let broker = ApprovalBroker::new();
        let (token, _rx) = broker.register();
        broker.cancel(&token);
        assert_eq!(broker.pending(), 0);
        assert!(!broker.resolve(&format!("approve:{}", token)));
    }

    #[test]
    fn keyboard_carries_token() {
        let keyboard = approval_keyboard("t1");
        let row = &keyboard["inline_keyboard"][0];
        assert_eq!(row[0]["text"], "✅ Approve");
        assert_eq!(row[0]["callback_data"], "approve:t1");
        assert_eq!(row[1]["callback_data"], "decline:t1");
    }

    #[test]
    fn parses_callback_updates() {
        let result = json!([
            { "update_id": 10, "callback_query": { "id": "q1", "data": "approve:t" } },
            { "update_id": 11, "message": { "text": "hi" } }
        ]);
        let updates = parse_updates(&result).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[0].callback,
            Some(CallbackPress { query_id: "q1".into(), data: "approve:t".into() })
        );
        assert!(updates[1].callback.is_none());
    }

    #[test]
    fn envelope_errors_surface_description() {
        let err = unwrap_result(&json!({ "ok": false, "description": "chat not found" })).unwrap_err();
        assert!(err.to_string().contains("chat not found"));
        assert_eq!(unwrap_result(&json!({ "ok": true, "result": 5 })).unwrap(), json!(5));
    }

    #[test]
    fn progress_text_format() {
        assert_eq!(progress_text(3, 7, "Ingesting"), "📊 Ingesting\nProgress: 3/7 (42.9%)");
        assert_eq!(progress_text(0, 0, "Idle"), "📊 Idle\nProgress: 0/0 (0.0%)");
    }

    #[test]
    fn yes_answers() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES \n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[tokio::test]
    async fn console_answer_from_reader() {
        use std::io::BufRead;

        let yes = spawn_line_reader(|buf| std::io::Cursor::new(b"yes\nmore".to_vec()).read_line(buf));
        assert_eq!(await_answer(yes, Duration::from_secs(5)).await.unwrap(), Some(true));

        let eof = spawn_line_reader(|buf| std::io::Cursor::new(Vec::new()).read_line(buf));
        assert_eq!(await_answer(eof, Duration::from_secs(5)).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn console_timeout_abandons_blocked_read() {
        let (release, blocked) = std::sync::mpsc::channel::<()>();
        let line = spawn_line_reader(move |_| {
            let _ = blocked.recv();
            Ok(0)
        });
        let started = std::time::Instant::now();
        assert_eq!(await_answer(line, Duration::from_millis(20)).await.unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(release);
    }
}
