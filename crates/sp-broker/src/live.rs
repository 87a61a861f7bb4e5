//! LIVE gateway adapter: REST order operations, WebSocket tick/fill
//! streams, reconnect supervision, heartbeat liveness.
//!
//! Order submission is compiled out unless the `live-broker` cargo feature
//! is enabled; a default build can stream real market data but cannot route
//! an order to the venue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use sp_domain::{Fill, Side, Tick};

use crate::adapter::{
    BrokerAck, BrokerAdapter, FillHandler, OrderTicket, SubscriptionId, TickHandler,
};
use crate::error::{BrokerError, BrokerErrorKind};
use crate::reconnect::{HeartbeatConfig, HeartbeatState, ReconnectPolicy};
use crate::token::TokenManager;

#[cfg(feature = "live-broker")]
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct LiveBrokerConfig {
    pub base_url: String,
    pub ws_url: String,
}

// ---------------------------------------------------------------------------
// Subscription registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SubRegistry {
    ticks: HashMap<u64, (Vec<String>, TickHandler)>,
    fills: HashMap<u64, (String, FillHandler)>,
}

impl SubRegistry {
    /// Subscribe frames for every registered subscription (sent on connect
    /// and re-sent after every reconnect).
    fn subscribe_frames(&self) -> Vec<String> {
        let mut frames = Vec::new();
        for (symbols, _) in self.ticks.values() {
            frames.push(
                serde_json::json!({"op": "subscribe", "channel": "ticks", "symbols": symbols})
                    .to_string(),
            );
        }
        for (account_id, _) in self.fills.values() {
            frames.push(
                serde_json::json!({"op": "subscribe", "channel": "fills", "account_id": account_id})
                    .to_string(),
            );
        }
        frames
    }

    fn dispatch_tick(&self, tick: &Tick) {
        for (symbols, handler) in self.ticks.values() {
            if symbols.iter().any(|s| s == &tick.symbol) {
                handler(tick.clone());
            }
        }
    }

    fn dispatch_fill(&self, fill: &Fill) {
        for (account_id, handler) in self.fills.values() {
            if account_id == &fill.account_id {
                handler(fill.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wire events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    Tick {
        symbol: String,
        price: Decimal,
        volume: i64,
        ts_ms: i64,
        #[serde(default)]
        status_code: String,
    },
    Fill {
        fill_id: String,
        order_id: String,
        account_id: String,
        symbol: String,
        side: String,
        fill_qty: i64,
        fill_price: Decimal,
        #[serde(default)]
        commission: Option<Decimal>,
        ts_ms: i64,
    },
}

fn millis_to_utc(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
}

// ---------------------------------------------------------------------------
// LiveBroker
// ---------------------------------------------------------------------------

enum StreamCommand {
    /// Send freshly-added subscribe frames on the current connection.
    Subscribe(Vec<String>),
}

pub struct LiveBroker {
    http: reqwest::Client,
    config: LiveBrokerConfig,
    tokens: Arc<TokenManager>,
    subs: Arc<Mutex<SubRegistry>>,
    next_sub: AtomicU64,
    stream_tx: mpsc::UnboundedSender<StreamCommand>,
}

impl LiveBroker {
    /// Build the adapter and start the stream supervisor task.
    pub fn connect(config: LiveBrokerConfig, tokens: Arc<TokenManager>) -> Arc<Self> {
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let broker = Arc::new(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("http client"),
            config,
            tokens,
            subs: Arc::new(Mutex::new(SubRegistry::default())),
            next_sub: AtomicU64::new(0),
            stream_tx,
        });

        tokio::spawn(stream_supervisor(
            broker.config.ws_url.clone(),
            Arc::clone(&broker.subs),
            Arc::clone(&broker.tokens),
            stream_rx,
        ));

        broker
    }

    #[cfg(feature = "live-broker")]
    fn classify_status(status: reqwest::StatusCode, body: &str) -> BrokerError {
        let kind = match status.as_u16() {
            401 | 403 => BrokerErrorKind::Authentication,
            429 => BrokerErrorKind::RateLimit,
            s if s >= 500 => BrokerErrorKind::ServerError,
            _ if body.contains("INSUFFICIENT") => BrokerErrorKind::InsufficientBalance,
            _ if body.contains("REJECT") => BrokerErrorKind::OrderRejected,
            _ => BrokerErrorKind::InvalidRequest,
        };
        BrokerError::new(kind, format!("gateway returned {status}: {body}"))
    }
}

#[async_trait]
impl BrokerAdapter for LiveBroker {
    async fn place_order(&self, ticket: &OrderTicket) -> Result<BrokerAck, BrokerError> {
        #[cfg(not(feature = "live-broker"))]
        {
            let _ = ticket;
            Err(BrokerError::invalid_request(
                "live order submission is disabled in this build (enable the live-broker feature)",
            ))
        }

        #[cfg(feature = "live-broker")]
        {
            #[derive(Debug, Deserialize)]
            struct SubmitResponse {
                broker_order_no: String,
            }

            let resp: SubmitResponse = RetryPolicy::ORDER
                .run(|| async {
                    let token = self.tokens.current().await?;
                    let resp = self
                        .http
                        .post(format!("{}/orders", self.config.base_url))
                        .bearer_auth(&token.token)
                        .json(&serde_json::json!({
                            "client_order_id": ticket.order_id,
                            "account_id": ticket.account_id,
                            "symbol": ticket.symbol,
                            "side": ticket.side.as_str(),
                            "order_type": ticket.order_type.as_str(),
                            "qty": ticket.qty,
                            "price": ticket.price,
                        }))
                        .send()
                        .await
                        .map_err(|e| BrokerError::network(e.to_string()))?;

                    let status = resp.status();
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    resp.json::<SubmitResponse>()
                        .await
                        .map_err(|e| BrokerError::invalid_request(format!("ack decode: {e}")))
                })
                .await?;

            Ok(BrokerAck {
                broker_order_no: resp.broker_order_no,
            })
        }
    }

    async fn cancel_order(&self, broker_order_no: &str) -> Result<(), BrokerError> {
        #[cfg(not(feature = "live-broker"))]
        {
            let _ = broker_order_no;
            Err(BrokerError::invalid_request(
                "live order cancellation is disabled in this build",
            ))
        }

        #[cfg(feature = "live-broker")]
        {
            RetryPolicy::ORDER
                .run(|| async {
                    let token = self.tokens.current().await?;
                    let resp = self
                        .http
                        .delete(format!(
                            "{}/orders/{broker_order_no}",
                            self.config.base_url
                        ))
                        .bearer_auth(&token.token)
                        .send()
                        .await
                        .map_err(|e| BrokerError::network(e.to_string()))?;

                    let status = resp.status();
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    Ok(())
                })
                .await
        }
    }

    async fn modify_order(
        &self,
        broker_order_no: &str,
        new_qty: Option<i64>,
        new_price: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        #[cfg(not(feature = "live-broker"))]
        {
            let _ = (broker_order_no, new_qty, new_price);
            Err(BrokerError::invalid_request(
                "live order modification is disabled in this build",
            ))
        }

        #[cfg(feature = "live-broker")]
        {
            RetryPolicy::ORDER
                .run(|| async {
                    let token = self.tokens.current().await?;
                    let resp = self
                        .http
                        .patch(format!(
                            "{}/orders/{broker_order_no}",
                            self.config.base_url
                        ))
                        .bearer_auth(&token.token)
                        .json(&serde_json::json!({
                            "new_qty": new_qty,
                            "new_price": new_price,
                        }))
                        .send()
                        .await
                        .map_err(|e| BrokerError::network(e.to_string()))?;

                    let status = resp.status();
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    Ok(())
                })
                .await
        }
    }

    async fn subscribe_ticks(
        &self,
        symbols: &[String],
        handler: TickHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = self.next_sub.fetch_add(1, Ordering::SeqCst) + 1;
        let frame =
            serde_json::json!({"op": "subscribe", "channel": "ticks", "symbols": symbols})
                .to_string();
        self.subs
            .lock()
            .ticks
            .insert(id, (symbols.to_vec(), handler));
        let _ = self.stream_tx.send(StreamCommand::Subscribe(vec![frame]));
        Ok(SubscriptionId(id))
    }

    async fn subscribe_fills(
        &self,
        account_id: &str,
        handler: FillHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = self.next_sub.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = serde_json::json!({
            "op": "subscribe", "channel": "fills", "account_id": account_id
        })
        .to_string();
        self.subs
            .lock()
            .fills
            .insert(id, (account_id.to_string(), handler));
        let _ = self.stream_tx.send(StreamCommand::Subscribe(vec![frame]));
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        let mut subs = self.subs.lock();
        subs.ticks.remove(&id.0);
        subs.fills.remove(&id.0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stream supervisor
// ---------------------------------------------------------------------------

/// Owns the WebSocket connection: connects, authenticates, replays the
/// subscription set, pumps events, enforces the heartbeat, reconnects with
/// backoff. Authentication failures stop the loop and page the operator
/// instead of spinning.
async fn stream_supervisor(
    ws_url: String,
    subs: Arc<Mutex<SubRegistry>>,
    tokens: Arc<TokenManager>,
    mut commands: mpsc::UnboundedReceiver<StreamCommand>,
) {
    let policy = ReconnectPolicy::default();
    let hb_cfg = HeartbeatConfig::default();
    let mut attempt: u32 = 0;

    loop {
        match tokens.current().await {
            Ok(_) => {}
            Err(e) if e.kind == BrokerErrorKind::Authentication => {
                error!(error = %e, "stream authentication failed; operator intervention required");
                return;
            }
            Err(e) => {
                warn!(error = %e, "token fetch failed before stream connect");
            }
        }

        match connect_async(ws_url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %ws_url, "stream connected");
                attempt = 0;
                let reason = drive_connection(ws, &subs, &hb_cfg, &mut commands).await;
                warn!(reason = %reason, "stream disconnected");
            }
            Err(e) => {
                warn!(error = %e, "stream connect failed");
            }
        }

        if policy.exhausted(attempt) {
            error!(
                attempts = attempt,
                "reconnect attempts exhausted; operator intervention required"
            );
            return;
        }
        let delay = policy.delay(attempt);
        attempt += 1;
        tokio::time::sleep(delay).await;
    }
}

/// Pump one live connection until it dies. Returns a human-readable
/// disconnect reason.
async fn drive_connection<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    subs: &Arc<Mutex<SubRegistry>>,
    hb_cfg: &HeartbeatConfig,
    commands: &mut mpsc::UnboundedReceiver<StreamCommand>,
) -> String
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();

    // Replay the full subscription set on every (re)connect.
    let frames = subs.lock().subscribe_frames();
    for frame in frames {
        if let Err(e) = write.send(Message::Text(frame)).await {
            return format!("resubscribe send failed: {e}");
        }
    }

    let mut hb = HeartbeatState::new();
    let mut ping_timer = tokio::time::interval(hb_cfg.interval);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so the ping cadence starts one
    // interval after connect.
    ping_timer.tick().await;

    let pong_deadline = tokio::time::sleep(hb_cfg.pong_deadline);
    tokio::pin!(pong_deadline);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_timer.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return format!("ping send failed: {e}");
                }
                pong_deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + hb_cfg.pong_deadline);
                awaiting_pong = true;
            }

            _ = &mut pong_deadline, if awaiting_pong => {
                awaiting_pong = false;
                if hb.on_miss(hb_cfg) {
                    return "heartbeat lost (3 consecutive missed pongs)".to_string();
                }
            }

            Some(cmd) = commands.recv() => {
                let StreamCommand::Subscribe(frames) = cmd;
                for frame in frames {
                    if let Err(e) = write.send(Message::Text(frame)).await {
                        return format!("subscribe send failed: {e}");
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        hb.on_pong();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            return format!("pong send failed: {e}");
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(&text, subs);
                    }
                    Some(Ok(Message::Close(_))) => {
                        return "server closed the stream".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return format!("stream read failed: {e}"),
                    None => return "stream ended".to_string(),
                }
            }
        }
    }
}

fn dispatch_text(text: &str, subs: &Arc<Mutex<SubRegistry>>) {
    match serde_json::from_str::<StreamEvent>(text) {
        Ok(StreamEvent::Tick {
            symbol,
            price,
            volume,
            ts_ms,
            status_code,
        }) => {
            let tick = Tick {
                symbol,
                price,
                volume,
                timestamp: millis_to_utc(ts_ms),
                status_code,
            };
            subs.lock().dispatch_tick(&tick);
        }
        Ok(StreamEvent::Fill {
            fill_id,
            order_id,
            account_id,
            symbol,
            side,
            fill_qty,
            fill_price,
            commission,
            ts_ms,
        }) => {
            let Some(side) = Side::parse(&side) else {
                warn!(%fill_id, %side, "fill with unknown side dropped");
                return;
            };
            let fill = Fill {
                fill_id,
                order_id,
                account_id,
                symbol,
                side,
                fill_qty,
                fill_price,
                commission,
                fill_ts: millis_to_utc(ts_ms),
            };
            subs.lock().dispatch_fill(&fill);
        }
        Err(e) => {
            warn!(error = %e, "unparseable stream frame dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tick_frames_dispatch_to_matching_subscribers() {
        let subs = Arc::new(Mutex::new(SubRegistry::default()));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: TickHandler = Arc::new(move |t: Tick| {
            assert_eq!(t.price, dec!(70100));
            seen.fetch_add(1, Ordering::SeqCst);
        });
        subs.lock()
            .ticks
            .insert(1, (vec!["005930".to_string()], handler));

        let frame = serde_json::json!({
            "type": "tick",
            "symbol": "005930",
            "price": "70100",
            "volume": 12,
            "ts_ms": 1741050000000i64,
        })
        .to_string();
        dispatch_text(&frame, &subs);
        // Different symbol: no dispatch.
        let other = serde_json::json!({
            "type": "tick",
            "symbol": "000660",
            "price": "180000",
            "volume": 3,
            "ts_ms": 1741050000000i64,
        })
        .to_string();
        dispatch_text(&other, &subs);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fill_frames_dispatch_by_account() {
        let subs = Arc::new(Mutex::new(SubRegistry::default()));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: FillHandler = Arc::new(move |f: Fill| {
            assert_eq!(f.fill_qty, 10);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        subs.lock().fills.insert(1, ("acct-1".to_string(), handler));

        let frame = serde_json::json!({
            "type": "fill",
            "fill_id": "F1",
            "order_id": "ord-1",
            "account_id": "acct-1",
            "symbol": "005930",
            "side": "BUY",
            "fill_qty": 10,
            "fill_price": "70100",
            "ts_ms": 1741050000000i64,
        })
        .to_string();
        dispatch_text(&frame, &subs);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn garbage_frames_are_dropped() {
        let subs = Arc::new(Mutex::new(SubRegistry::default()));
        dispatch_text("not json", &subs);
        dispatch_text("{\"type\":\"unknown\"}", &subs);
    }

    #[test]
    fn resubscribe_frames_cover_all_registrations() {
        let mut reg = SubRegistry::default();
        let tick_handler: TickHandler = Arc::new(|_| {});
        let fill_handler: FillHandler = Arc::new(|_| {});
        reg.ticks
            .insert(1, (vec!["005930".to_string()], tick_handler));
        reg.fills.insert(2, ("acct-1".to_string(), fill_handler));
        let frames = reg.subscribe_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().any(|f| f.contains("\"channel\":\"ticks\"")));
        assert!(frames.iter().any(|f| f.contains("\"channel\":\"fills\"")));
    }
}
