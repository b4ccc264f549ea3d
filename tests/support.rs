use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header, encode};
use notification_gateway::{
    auth::Claims,
    clients::{
        circuit_breaker::CircuitBreaker,
        rbmq::{Broker, BrokerTopology, OutboundMessage, PublishError},
        redis::TtlStore,
        remote::EntityChecker,
    },
    models::{circuit_breaker::CircuitBreakerConfig, request::SendNotificationRequest},
    services::{
        DependencyValidator, Dispatcher, IdempotencyGuard, QueuePublisher, StatusStore,
        dispatcher::DispatchSettings,
    },
};
use parking_lot::Mutex;

pub const JWT_SECRET: &str = "test-secret";

/// In-memory TTL store. `set_nx_ex` holds the lock across check and write.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_reservations: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reservations(&self, fail: bool) {
        self.fail_reservations.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, value: &str, ttl: Duration) {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.live_value(key).is_some()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(key, (_, expires_at))| key.starts_with(prefix) && *expires_at > now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn check_reads(&self) -> Result<(), Error> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store read failure"));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.check_reads()?;
        Ok(self.live_value(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        self.check_writes()?;
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        if self.fail_reservations.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store reservation failure"));
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > now)
        {
            return Ok(false);
        }

        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        self.check_reads()?;
        Ok(self.live_value(key).is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.check_writes()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), Error> {
        self.check_reads()
    }
}

/// Broker that keeps every message it received in memory.
pub struct RecordingBroker {
    published: Mutex<Vec<OutboundMessage>>,
    declared: Mutex<Vec<BrokerTopology>>,
    failing: AtomicBool,
    losing_confirms: AtomicBool,
    connected: AtomicBool,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            declared: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            losing_confirms: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        })
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Keep the message but fail the confirm, as when the channel drops mid-publish.
    pub fn lose_confirms(&self, lose: bool) {
        self.losing_confirms.store(lose, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().clone()
    }

    pub fn declared(&self) -> Vec<BrokerTopology> {
        self.declared.lock().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn declare_topology(&self, topology: &BrokerTopology) -> Result<(), Error> {
        self.declared.lock().push(topology.clone());
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::NotSent(anyhow!("broker connection refused")));
        }
        self.published.lock().push(message);

        if self.losing_confirms.load(Ordering::SeqCst) {
            return Err(PublishError::Unconfirmed(anyhow!("channel closed before confirm")));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Remote service stand-in that knows a fixed set of ids.
pub struct StubChecker {
    known: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl StubChecker {
    pub fn knowing(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            known: Mutex::new(ids.iter().map(|id| id.to_string()).collect()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

#[async_trait]
impl EntityChecker for StubChecker {
    async fn exists(&self, id: &str) -> Result<bool, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("remote service returned 503"));
        }

        Ok(self.known.lock().contains(id))
    }
}

pub fn topology() -> BrokerTopology {
    BrokerTopology {
        exchange: "notification.direct".to_string(),
        email_queue: "email.queue".to_string(),
        push_queue: "push.queue".to_string(),
    }
}

pub fn request(user_id: &str, template_id: &str) -> SendNotificationRequest {
    SendNotificationRequest {
        user_id: user_id.to_string(),
        template_id: template_id.to_string(),
        scheduled_for: None,
    }
}

pub fn token_for(user_id: &str) -> String {
    let claims = Claims {
        sub: None,
        user_id: Some(user_id.to_string()),
        exp: chrono::Utc::now().timestamp() + 3600,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("test token should encode")
}

/// A dispatcher wired to in-memory collaborators, with handles on each of them.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<RecordingBroker>,
    pub users: Arc<StubChecker>,
    pub templates: Arc<StubChecker>,
    pub user_breaker: Arc<CircuitBreaker>,
    pub template_breaker: Arc<CircuitBreaker>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(DispatchSettings::default())
    }

    pub fn with_settings(settings: DispatchSettings) -> Self {
        let store = MemoryStore::new();
        let broker = RecordingBroker::new();
        let users = StubChecker::knowing(&["u1", "u2"]);
        let templates = StubChecker::knowing(&["t1", "t2"]);
        let user_breaker = Arc::new(CircuitBreaker::new("user", CircuitBreakerConfig::default()));
        let template_breaker = Arc::new(CircuitBreaker::new(
            "template",
            CircuitBreakerConfig::default(),
        ));

        let shared: Arc<dyn TtlStore> = store.clone();

        let dispatcher = Dispatcher::new(
            IdempotencyGuard::new(shared.clone(), Duration::from_secs(300)),
            DependencyValidator::new(
                "user",
                shared.clone(),
                Duration::from_secs(86_400),
                users.clone(),
                user_breaker.clone(),
            ),
            DependencyValidator::new(
                "template",
                shared.clone(),
                Duration::from_secs(300),
                templates.clone(),
                template_breaker.clone(),
            ),
            QueuePublisher::new(broker.clone(), topology()),
            StatusStore::new(shared, Duration::from_secs(5)),
            settings,
        );

        Self {
            store,
            broker,
            users,
            templates,
            user_breaker,
            template_breaker,
            dispatcher,
        }
    }
}
