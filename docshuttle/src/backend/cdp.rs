//! DevTools-protocol backed [`PageDriver`].
//!
//! Attaches to an already-running browser over its DevTools endpoint:
//! HTTP discovery of the page target, then a WebSocket command channel
//! with a pending-request map of oneshot channels. Queries are
//! evaluated by a small in-page interpreter shipped with every
//! `Runtime.evaluate` call, so the engine-side [`Query`] stays
//! declarative.
//!
//! The driver also owns the browser-profile lock file: two concurrent
//! runs against the same profile corrupt shared state, so the second
//! one must fail fast instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};

use crate::backend::PageDriver;
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::query::Query;
use crate::wait::{await_condition, race_with_timeout};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(45);

type CommandResult = Result<Value, String>;
type PendingMap = HashMap<u64, oneshot::Sender<CommandResult>>;
type Pending = Arc<Mutex<PendingMap>>;

/// Exclusive ownership of the on-disk browser profile.
///
/// Created atomically (`create_new`) so two racing runs cannot both win.
/// Released on drop, best-effort.
pub struct ProfileLock {
    path: PathBuf,
}

impl ProfileLock {
    pub fn acquire(profile_dir: &Path) -> Result<Self, EngineError> {
        std::fs::create_dir_all(profile_dir)
            .map_err(|e| EngineError::Driver(format!("cannot create profile dir: {e}")))?;
        let path = profile_dir.join("browser-profile.lock");

        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let contents = format!(
            "pid={}\nstarted={}\nprofile={}\n",
            std::process::id(),
            started,
            profile_dir.display()
        );

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write as _;
                file.write_all(contents.as_bytes())
                    .map_err(|e| EngineError::Driver(format!("cannot write lock file: {e}")))?;
                info!(lock = %path.display(), "profile lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                Err(EngineError::LockHeld(format!(
                    "{} (held by: {})",
                    path.display(),
                    holder.trim().replace('\n', ", ")
                )))
            }
            Err(e) => Err(EngineError::Driver(format!("cannot create lock file: {e}"))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "profile lock release failed");
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(rename = "type")]
    target_type: String,
    url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: Option<String>,
}

pub struct CdpDriver {
    tx: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    _reader: JoinHandle<()>,
    _writer: JoinHandle<()>,
    _lock: ProfileLock,
}

impl CdpDriver {
    /// Discover the browser's page target and attach to it.
    #[instrument(skip(config))]
    pub async fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let lock = ProfileLock::acquire(&config.profile_dir)?;

        let list_url = format!("http://127.0.0.1:{}/json/list", config.devtools_port);
        let targets: Vec<TargetInfo> = reqwest::get(&list_url)
            .await
            .map_err(|e| EngineError::Driver(format!("devtools discovery failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::Driver(format!("devtools discovery parse failed: {e}")))?;

        let target = targets
            .iter()
            .find(|t| t.target_type == "page" && t.ws_url.is_some())
            .ok_or_else(|| {
                EngineError::Driver("no attachable page target at devtools endpoint".into())
            })?;
        let ws_url = target.ws_url.clone().unwrap_or_default();
        debug!(url = %target.url, "attaching to page target");

        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| EngineError::Driver(format!("devtools connect failed: {e}")))?;
        let (mut sink, mut stream) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "devtools send failed");
                    break;
                }
            }
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = pending.clone();
        let tx_reader = tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if !msg.is_text() {
                    continue;
                }
                let text = msg.into_text().unwrap_or_default();
                let value: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "invalid devtools frame");
                        continue;
                    }
                };

                if let Some(id) = value.get("id").and_then(Value::as_u64) {
                    let outcome = if let Some(err) = value.get("error") {
                        Err(err
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown devtools error")
                            .to_string())
                    } else {
                        Ok(value.get("result").cloned().unwrap_or(Value::Null))
                    };
                    if let Some(sender) = pending_reader.lock().await.remove(&id) {
                        let _ = sender.send(outcome);
                    }
                    continue;
                }

                // Native JS dialogs block the whole protocol; accept
                // them immediately so the watchdog only has to deal
                // with DOM-level modals.
                if value.get("method").and_then(Value::as_str)
                    == Some("Page.javascriptDialogOpening")
                {
                    warn!("native javascript dialog opening; accepting");
                    let frame = json!({
                        "id": u64::MAX,
                        "method": "Page.handleJavaScriptDialog",
                        "params": { "accept": true },
                    });
                    let _ = tx_reader.send(Message::Text(frame.to_string()));
                }
            }
            debug!("devtools stream closed");
        });

        let driver = Self {
            tx,
            pending,
            next_id: AtomicU64::new(1),
            _reader: reader,
            _writer: writer,
            _lock: lock,
        };

        driver.send_command("Page.enable", json!({})).await?;
        driver.send_command("Runtime.enable", json!({})).await?;
        if let Some(auth) = &config.basic_auth {
            let token = BASE64.encode(format!("{}:{}", auth.username, auth.password));
            driver.send_command("Network.enable", json!({})).await?;
            driver
                .send_command(
                    "Network.setExtraHTTPHeaders",
                    json!({ "headers": { "Authorization": format!("Basic {token}") } }),
                )
                .await?;
            debug!("basic auth pass-through configured");
        }

        Ok(driver)
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel::<CommandResult>();
        self.pending.lock().await.insert(id, sender);

        let frame = json!({ "id": id, "method": method, "params": params });
        if self.tx.send(Message::Text(frame.to_string())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(EngineError::Driver("devtools channel closed".into()));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, receiver).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(EngineError::Driver(format!("{method}: {message}"))),
            Ok(Err(_)) => Err(EngineError::Driver(format!("{method}: channel dropped"))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(EngineError::Timeout {
                    label: format!("devtools command {method}"),
                    elapsed_ms: COMMAND_TIMEOUT.as_millis() as u64,
                })
            }
        }
    }

    /// Evaluate an expression in the page and return its value.
    async fn eval(&self, expression: &str) -> Result<Value, EngineError> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .unwrap_or("unknown page exception");
            return Err(EngineError::Driver(format!("page exception: {text}")));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn query_expr(op: &str, query: &Query, extra: &str) -> Result<String, EngineError> {
        let encoded = serde_json::to_string(query)
            .map_err(|e| EngineError::InvalidQuery(format!("{query}: {e}")))?;
        Ok(format!(
            "(function() {{ {INTERPRETER} return {op}({encoded}{extra}); }})()"
        ))
    }
}

/// In-page query interpreter, shipped with every evaluate call so the
/// page never needs a persistent installed helper (navigations would
/// wipe it anyway).
const INTERPRETER: &str = r#"
const norm = (s) => (s || "").replace(/\s+/g, " ").trim();
const textOf = (el) => norm(el.innerText !== undefined ? el.innerText : el.textContent);
const ownTextOf = (el) => {
    let out = "";
    for (const node of el.childNodes) {
        if (node.nodeType === Node.TEXT_NODE) out += node.textContent;
    }
    return norm(out);
};
const matches = (hay, needle, exact) => {
    const h = norm(hay).toLowerCase();
    const n = norm(needle).toLowerCase();
    return exact ? h === n : h.includes(n);
};
const visible = (el) => {
    if (!el.getClientRects || el.getClientRects().length === 0) return false;
    const style = window.getComputedStyle(el);
    return style.display !== "none" && style.visibility !== "hidden";
};
const resolve = (q, roots) => {
    roots = roots || [document];
    const out = [];
    const push = (el) => { if (el && !out.includes(el)) out.push(el); };
    switch (q.kind) {
        case "css":
            for (const root of roots) {
                for (const el of root.querySelectorAll(q.spec)) push(el);
            }
            break;
        case "x_path":
            for (const root of roots) {
                const ctx = root === document ? document : root;
                const res = document.evaluate(q.spec, ctx, null,
                    XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                for (let i = 0; i < res.snapshotLength; i++) push(res.snapshotItem(i));
            }
            break;
        case "text":
            for (const root of roots) {
                const scope = root === document ? document.body : root;
                if (!scope) continue;
                if (scope.nodeType === Node.ELEMENT_NODE &&
                    matches(ownTextOf(scope), q.spec.needle, q.spec.exact)) push(scope);
                for (const el of scope.querySelectorAll("*")) {
                    if (matches(ownTextOf(el), q.spec.needle, q.spec.exact)) push(el);
                }
            }
            break;
        case "has_text":
            for (const root of roots) {
                for (const el of root.querySelectorAll(q.spec.base)) {
                    if (matches(textOf(el), q.spec.needle, q.spec.exact)) push(el);
                }
            }
            break;
        case "within": {
            const outer = resolve(q.spec[0], roots);
            for (const el of resolve(q.spec[1], outer)) push(el);
            break;
        }
        case "any_of":
            for (const alt of q.spec) {
                const found = resolve(alt, roots);
                if (found.length > 0) return found;
            }
            break;
    }
    return out;
};
const pick = (els) => els.find(visible) || els[0] || null;
const clickable = (el) => {
    if (!el) return null;
    const tag = el.tagName ? el.tagName.toLowerCase() : "";
    if (["a", "button", "input", "li"].includes(tag) ||
        el.getAttribute && el.getAttribute("role") === "button") return el;
    return el.closest("a, button, li") || el;
};
const dsCount = (q) => resolve(q).length;
const dsVisible = (q) => resolve(q).some(visible);
const dsChecked = (q) => { const el = pick(resolve(q)); return !!(el && el.checked); };
const dsClick = (q) => {
    const el = clickable(pick(resolve(q)));
    if (!el) return false;
    if (el.scrollIntoView) el.scrollIntoView({ block: "center" });
    el.click();
    return true;
};
const dsFill = (q, value) => {
    const el = pick(resolve(q));
    if (!el) return false;
    el.focus();
    const proto = el.tagName === "TEXTAREA"
        ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
    const setter = Object.getOwnPropertyDescriptor(proto, "value");
    if (setter && setter.set) setter.set.call(el, value); else el.value = value;
    el.dispatchEvent(new Event("input", { bubbles: true }));
    el.dispatchEvent(new Event("change", { bubbles: true }));
    return true;
};
const dsTexts = (q) => resolve(q).map(textOf).filter(Boolean);
const dsValue = (q) => { const el = pick(resolve(q)); return el && el.value !== undefined ? el.value : ""; };
const dsScrollTop = (q) => { const el = pick(resolve(q)); if (el) el.scrollTop = 0; return !!el; };
const dsScrollAdvance = (q, fraction) => {
    const el = pick(resolve(q));
    if (!el) return false;
    const before = el.scrollTop;
    el.scrollTop = before + el.clientHeight * fraction;
    return el.scrollTop !== before;
};
"#;

#[async_trait]
impl PageDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> Result<(), EngineError> {
        race_with_timeout(
            &format!("navigate to {url}"),
            NAVIGATION_TIMEOUT,
            self.send_command("Page.navigate", json!({ "url": url })),
        )
        .await?;

        // The target UIs are server-rendered; readiness means the DOM
        // has parsed, not that every subresource has settled.
        let this = self;
        await_condition(
            "document ready after navigation",
            NAVIGATION_TIMEOUT,
            Duration::from_millis(200),
            move || async move {
                matches!(
                    this.eval("document.readyState").await,
                    Ok(Value::String(state)) if state == "interactive" || state == "complete"
                )
            },
        )
        .await
    }

    async fn current_url(&self) -> Result<String, EngineError> {
        match self.eval("window.location.href").await? {
            Value::String(url) => Ok(url),
            other => Err(EngineError::Driver(format!("unexpected url value: {other}"))),
        }
    }

    async fn title(&self) -> Result<String, EngineError> {
        match self.eval("document.title").await? {
            Value::String(title) => Ok(title),
            _ => Ok(String::new()),
        }
    }

    async fn count(&self, query: &Query) -> Result<usize, EngineError> {
        let expr = Self::query_expr("dsCount", query, "")?;
        Ok(self.eval(&expr).await?.as_u64().unwrap_or(0) as usize)
    }

    async fn is_visible(&self, query: &Query) -> Result<bool, EngineError> {
        let expr = Self::query_expr("dsVisible", query, "")?;
        Ok(self.eval(&expr).await?.as_bool().unwrap_or(false))
    }

    async fn is_checked(&self, query: &Query) -> Result<bool, EngineError> {
        let expr = Self::query_expr("dsChecked", query, "")?;
        Ok(self.eval(&expr).await?.as_bool().unwrap_or(false))
    }

    async fn click(&self, query: &Query) -> Result<(), EngineError> {
        let expr = Self::query_expr("dsClick", query, "")?;
        if self.eval(&expr).await?.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(EngineError::Driver(format!("nothing to click for {query}")))
        }
    }

    async fn fill(&self, query: &Query, text: &str) -> Result<(), EngineError> {
        let encoded = serde_json::to_string(text)
            .map_err(|e| EngineError::Driver(format!("fill encode: {e}")))?;
        let expr = Self::query_expr("dsFill", query, &format!(", {encoded}"))?;
        if self.eval(&expr).await?.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(EngineError::Driver(format!("nothing to fill for {query}")))
        }
    }

    async fn press_key(&self, key: &str) -> Result<(), EngineError> {
        let (code, text) = match key {
            "Enter" => (13, Some("\r")),
            "Escape" => (27, None),
            "Space" => (32, Some(" ")),
            "Tab" => (9, None),
            other => {
                return Err(EngineError::Driver(format!("unsupported key: {other}")));
            }
        };

        self.send_command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "rawKeyDown",
                "windowsVirtualKeyCode": code,
                "key": key,
            }),
        )
        .await?;
        if let Some(text) = text {
            self.send_command(
                "Input.dispatchKeyEvent",
                json!({ "type": "char", "text": text, "key": key }),
            )
            .await?;
        }
        self.send_command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "windowsVirtualKeyCode": code,
                "key": key,
            }),
        )
        .await?;
        Ok(())
    }

    async fn read_texts(&self, query: &Query) -> Result<Vec<String>, EngineError> {
        let expr = Self::query_expr("dsTexts", query, "")?;
        match self.eval(&expr).await? {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn read_value(&self, query: &Query) -> Result<String, EngineError> {
        let expr = Self::query_expr("dsValue", query, "")?;
        match self.eval(&expr).await? {
            Value::String(value) => Ok(value),
            _ => Ok(String::new()),
        }
    }

    async fn scroll_to_top(&self, query: &Query) -> Result<(), EngineError> {
        let expr = Self::query_expr("dsScrollTop", query, "")?;
        self.eval(&expr).await?;
        Ok(())
    }

    async fn scroll_advance(&self, query: &Query, fraction: f64) -> Result<bool, EngineError> {
        let expr = Self::query_expr("dsScrollAdvance", query, &format!(", {fraction}"))?;
        Ok(self.eval(&expr).await?.as_bool().unwrap_or(false))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, EngineError> {
        let result = self
            .send_command(
                "Page.captureScreenshot",
                json!({ "format": "png", "captureBeyondViewport": true }),
            )
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Driver("screenshot returned no data".into()))?;
        BASE64
            .decode(data)
            .map_err(|e| EngineError::Driver(format!("screenshot decode: {e}")))
    }

    async fn clear_cookies(&self, origin: &str) -> Result<(), EngineError> {
        self.send_command(
            "Storage.clearDataForOrigin",
            json!({ "origin": origin, "storageTypes": "cookies" }),
        )
        .await?;
        debug!(origin, "cookies cleared");
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        // The operator may want the browser window to outlive the run;
        // closing the session only detaches the command channel. The
        // profile lock releases when the driver drops.
        Ok(())
    }
}
