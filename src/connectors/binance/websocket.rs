//! Binance market feed subscriber
//!
//! Keeps at most one WebSocket open to the combined-stream endpoint, follows
//! the wanted stream set with SUBSCRIBE/UNSUBSCRIBE frames and writes every
//! parsed ticker price into the shared [`MarketCache`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::config::{COMBINED_STREAM_PATH, HEARTBEAT_PATH, SUBSCRIBE_METHOD, UNSUBSCRIBE_METHOD};
use super::parser::{create_control_message, normalize_symbol, parse_ticker_message, stream_name_for_symbol};
use crate::cache::{now_ms, MarketCache};
use crate::config::MarketFeedConfig;
use crate::error::AppError;
use crate::types::{ConnectionStatus, PriceTick};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to the feed. Cloning shares the same connection and state.
#[derive(Clone)]
pub struct MarketFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    config: MarketFeedConfig,
    cache: Arc<MarketCache>,
    wanted_streams: RwLock<BTreeSet<String>>,
    status: RwLock<ConnectionStatus>,
    /// Sender into the live session's writer, present only while connected.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// True while a connection loop task exists.
    loop_running: AtomicBool,
    shutdown: watch::Sender<bool>,
    connection_id: String,
}

impl MarketFeed {
    pub fn new(config: MarketFeedConfig, cache: Arc<MarketCache>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let connection_id = format!("binance-ws-{}", now_ms());

        Self {
            inner: Arc::new(FeedInner {
                config,
                cache,
                wanted_streams: RwLock::new(BTreeSet::new()),
                status: RwLock::new(ConnectionStatus::Disconnected),
                outbound: Mutex::new(None),
                loop_running: AtomicBool::new(false),
                shutdown,
                connection_id,
            }),
        }
    }

    /// Start the connection loop unless one is already running.
    ///
    /// The loop is alive while connecting, connected, and during the backoff
    /// between attempts, so repeated calls never open a second socket.
    ///
    /// A pending `disconnect` is cancelled first. A loop that is already
    /// winding down sees the cleared flag and keeps running, or restarts
    /// itself if it had already left its loop.
    pub fn ensure_connected(&self) {
        // Only notify on a real change; a spurious wake would end a live session.
        self.inner.shutdown.send_if_modified(|stopping| {
            let was_stopping = *stopping;
            *stopping = false;
            was_stopping
        });

        if !self.inner.try_claim_loop() {
            trace!("[Binance] {} connection loop already running", self.inner.connection_id);
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            FeedInner::connection_loop(inner).await;
        });
    }

    /// Stop reconnecting and close the socket.
    pub fn disconnect(&self) {
        info!("[Binance] {} disconnect requested", self.inner.connection_id);
        self.inner.shutdown.send_replace(true);
    }

    /// Add symbols to the wanted set. Returns the normalized stream ids.
    ///
    /// When connected a SUBSCRIBE frame is sent; otherwise the connection is
    /// started and the streams go into the URL of the next attempt.
    pub async fn subscribe_symbols<I, S>(&self, symbols: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let streams = normalize_streams(symbols);
        if streams.is_empty() {
            return streams;
        }

        let sent = {
            let mut wanted = self.inner.wanted_streams.write().await;
            wanted.extend(streams.iter().cloned());
            self.inner.send_control(SUBSCRIBE_METHOD, &streams).await
        };

        if sent {
            debug!("[Binance] {} subscribed {:?}", self.inner.connection_id, streams);
        } else {
            self.ensure_connected();
        }
        streams
    }

    /// Remove symbols from the wanted set, sending UNSUBSCRIBE when connected.
    /// The connection is not rebuilt.
    pub async fn unsubscribe_symbols<I, S>(&self, symbols: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let streams = normalize_streams(symbols);
        if streams.is_empty() {
            return streams;
        }

        let mut wanted = self.inner.wanted_streams.write().await;
        for stream in &streams {
            wanted.remove(stream);
        }
        if self.inner.send_control(UNSUBSCRIBE_METHOD, &streams).await {
            debug!("[Binance] {} unsubscribed {:?}", self.inner.connection_id, streams);
        }
        streams
    }

    /// Cached price for `symbol`, `None` when unknown or older than the TTL.
    pub fn get_price(&self, symbol: &str) -> Option<f64> {
        self.inner
            .cache
            .get_cached_price(&normalize_symbol(symbol), self.inner.config.price_ttl())
    }

    /// Process one text frame. Frames without a usable price are dropped.
    pub fn handle_text(&self, text: &str) -> Option<PriceTick> {
        self.inner.handle_text(text)
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.inner.status.read().await
    }

    pub async fn is_subscribed(&self, symbol: &str) -> bool {
        match stream_name_for_symbol(symbol) {
            Some(stream) => self.inner.wanted_streams.read().await.contains(&stream),
            None => false,
        }
    }

    pub async fn wanted_streams(&self) -> Vec<String> {
        self.inner.wanted_streams.read().await.iter().cloned().collect()
    }

    /// URL the next connection attempt would use.
    pub async fn connection_url(&self) -> String {
        let wanted = self.inner.wanted_streams.read().await;
        build_connection_url(&self.inner.config.ws_base, &wanted)
    }
}

impl FeedInner {
    fn try_claim_loop(&self) -> bool {
        self.loop_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn connection_loop(inner: Arc<FeedInner>) {
        let mut shutdown = inner.shutdown.subscribe();

        loop {
            inner.run_until_shutdown(&mut shutdown).await;
            inner.loop_running.store(false, Ordering::SeqCst);

            // ensure_connected may have run between the break and the store
            // above; its claim failed, so this task picks the work back up.
            if *inner.shutdown.borrow() || !inner.try_claim_loop() {
                break;
            }
            info!("[Binance] {} connect requested while stopping, restarting", inner.connection_id);
        }

        info!("[Binance] {} connection loop stopped", inner.connection_id);
    }

    async fn run_until_shutdown(&self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let (url, url_streams) = {
                let wanted = self.wanted_streams.read().await;
                (build_connection_url(&self.config.ws_base, &wanted), wanted.clone())
            };

            self.set_status(ConnectionStatus::Connecting).await;
            info!("[Binance] {} connecting to {}", self.connection_id, url);

            match connect_async(url.as_str()).await {
                Ok((ws_stream, _response)) => {
                    info!("[Binance] {} connected", self.connection_id);
                    self.run_session(ws_stream, url_streams, shutdown).await;
                }
                Err(e) => {
                    warn!("[Binance] {} connect failed: {}", self.connection_id, AppError::from(e));
                }
            }

            self.outbound.lock().await.take();
            self.set_status(ConnectionStatus::Disconnected).await;

            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            // Fixed delay, not exponential.
            let delay = self.config.reconnect_delay();
            info!("[Binance] {} reconnecting in {:?}", self.connection_id, delay);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn run_session(
        &self,
        ws_stream: WsStream,
        url_streams: BTreeSet<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        {
            // Holding the set here orders this transition against concurrent
            // subscribe/unsubscribe calls.
            let wanted = self.wanted_streams.read().await;
            *self.outbound.lock().await = Some(tx.clone());
            *self.status.write().await = ConnectionStatus::Connected;

            // The set may have changed between building the URL and the
            // handshake completing.
            let missing: Vec<String> = wanted.difference(&url_streams).cloned().collect();
            let dropped: Vec<String> = url_streams.difference(&wanted).cloned().collect();
            if !missing.is_empty() {
                let _ = tx.send(Message::Text(create_control_message(SUBSCRIBE_METHOD, &missing, now_ms())));
            }
            if !dropped.is_empty() {
                let _ = tx.send(Message::Text(create_control_message(UNSUBSCRIBE_METHOD, &dropped, now_ms())));
            }
        }
        drop(tx);

        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(message) => {
                        if let Err(e) = write.send(message).await {
                            warn!("[Binance] {} send failed: {}", self.connection_id, AppError::from(e));
                            break;
                        }
                    }
                    None => break,
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(&text);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            warn!("[Binance] {} pong failed: {}", self.connection_id, AppError::from(e));
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("[Binance] {} closed by server: {:?}", self.connection_id, frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        // Tear the session down; the loop handles reconnection.
                        warn!("[Binance] {} read failed: {}", self.connection_id, AppError::from(e));
                        break;
                    }
                    None => {
                        info!("[Binance] {} stream ended", self.connection_id);
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        let _ = write.close().await;
    }

    fn handle_text(&self, text: &str) -> Option<PriceTick> {
        match parse_ticker_message(text) {
            Some(tick) => {
                self.cache.set_cached_price(&tick.symbol, tick.price);
                Some(tick)
            }
            None => {
                trace!(
                    "[Binance] {} dropped frame: {}",
                    self.connection_id,
                    text.chars().take(100).collect::<String>()
                );
                None
            }
        }
    }

    /// Send a control frame if a session is live. Returns whether it was queued.
    async fn send_control(&self, method: &str, streams: &[String]) -> bool {
        if *self.status.read().await != ConnectionStatus::Connected {
            return false;
        }
        let outbound = self.outbound.lock().await;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(Message::Text(create_control_message(method, streams, now_ms())))
                .is_ok(),
            None => false,
        }
    }

    async fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().await = status;
    }
}

fn normalize_streams<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut streams: Vec<String> = Vec::new();
    for stream in symbols
        .into_iter()
        .filter_map(|s| stream_name_for_symbol(s.as_ref()))
    {
        if !streams.contains(&stream) {
            streams.push(stream);
        }
    }
    streams
}

fn build_connection_url(base: &str, streams: &BTreeSet<String>) -> String {
    let base = base.trim_end_matches('/');
    if streams.is_empty() {
        return format!("{}{}", base, HEARTBEAT_PATH);
    }
    let joined = streams.iter().cloned().collect::<Vec<_>>().join("/");
    format!("{}{}{}", base, COMBINED_STREAM_PATH, joined)
}
