use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use bson::oid::ObjectId;
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::CrudError;

/// Form field carrying the anti-forgery token on every POST.
pub const CSRF_FIELD: &str = "_csrf";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    List,
    Add,
    Edit,
    View,
    Delete,
    Stats,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Add => "add",
            Action::Edit => "edit",
            Action::View => "view",
            Action::Delete => "delete",
            Action::Stats => "stats",
        }
    }
}

/// "Can `actor` do `action` on `collection` (or one record of it)?"
#[derive(Debug, Clone, Copy)]
pub struct Capability<'a> {
    pub actor: Option<&'a Actor>,
    pub action: Action,
    pub collection: &'a str,
    pub record_id: Option<&'a ObjectId>,
}

/// A response some collaborator already produced. The engine stops and
/// forwards it untouched.
#[derive(Debug)]
pub struct Halt(pub Response<Vec<u8>>);

impl Halt {
    pub fn json(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "error": message });
        let response = Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body.to_string().into_bytes())
            .unwrap_or_else(|_| Response::new(Vec::new()));
        Halt(response)
    }

    pub fn into_response(self) -> Response<Vec<u8>> {
        self.0
    }
}

/// Capability checks. A denial carries the response the subject should see;
/// the engine does not know or care what it looks like.
pub trait Authorizer: Send + Sync {
    fn check(&self, capability: &Capability<'_>) -> Result<(), Halt>;

    /// Response for an id that fails the record-id format check.
    fn reject_id(&self, _actor: Option<&Actor>, raw_id: &str) -> Halt {
        Halt::json(
            StatusCode::NOT_FOUND,
            &format!("invalid record id '{raw_id}'"),
        )
    }
}

pub trait CsrfGuard: Send + Sync {
    /// Token to embed in forms rendered for this session.
    fn issue(&self, session_id: Option<&str>) -> Option<String>;

    fn verify(&self, session_id: Option<&str>, submitted: Option<&str>) -> Result<(), CrudError>;
}

/// Per-session values that expire after `ttl` and never exceed `capacity`
/// entries. Inserting into a full map drops expired entries first, then the
/// least recently touched one.
struct SessionMap<V> {
    entries: HashMap<String, (Instant, V)>,
    ttl: Duration,
    capacity: usize,
}

impl<V> SessionMap<V> {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn live(&self, session_id: &str) -> Option<&V> {
        self.entries
            .get(session_id)
            .filter(|(touched, _)| touched.elapsed() < self.ttl)
            .map(|(_, value)| value)
    }

    fn get_or_insert_with(&mut self, session_id: &str, make: impl FnOnce() -> V) -> &mut V {
        let expired = self
            .entries
            .get(session_id)
            .is_some_and(|(touched, _)| touched.elapsed() >= self.ttl);
        if expired {
            self.entries.remove(session_id);
        }
        if !self.entries.contains_key(session_id) {
            self.make_room();
        }
        let entry = self
            .entries
            .entry(session_id.to_string())
            .or_insert_with(|| (Instant::now(), make()));
        entry.0 = Instant::now();
        &mut entry.1
    }

    fn take(&mut self, session_id: &str) -> Option<V> {
        let (touched, value) = self.entries.remove(session_id)?;
        (touched.elapsed() < self.ttl).then_some(value)
    }

    fn make_room(&mut self) {
        if self.entries.len() < self.capacity {
            return;
        }
        let ttl = self.ttl;
        self.entries.retain(|_, (touched, _)| touched.elapsed() < ttl);
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (touched, _))| *touched)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::debug!(session = %oldest, "evicted session entry");
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One random token per session, held in memory.
pub struct SessionCsrf {
    tokens: Mutex<SessionMap<String>>,
}

impl SessionCsrf {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_limits(Self::DEFAULT_TTL, Self::DEFAULT_CAPACITY)
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            tokens: Mutex::new(SessionMap::new(ttl, capacity)),
        }
    }

    /// Sessions currently holding a token.
    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionCsrf {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrfGuard for SessionCsrf {
    fn issue(&self, session_id: Option<&str>) -> Option<String> {
        let session_id = session_id?;
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let token =
            tokens.get_or_insert_with(session_id, || format!("{:032x}", rand::random::<u128>()));
        Some(token.clone())
    }

    fn verify(&self, session_id: Option<&str>, submitted: Option<&str>) -> Result<(), CrudError> {
        let session_id = session_id.ok_or_else(|| CrudError::Forgery("no session".into()))?;
        let submitted = submitted
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CrudError::Forgery("missing token".into()))?;
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let expected = tokens
            .live(session_id)
            .ok_or_else(|| CrudError::Forgery("no token issued for session".into()))?;
        if bool::from(expected.as_bytes().ct_eq(submitted.as_bytes())) {
            Ok(())
        } else {
            Err(CrudError::Forgery("token mismatch".into()))
        }
    }
}

/// One-shot notices: queued after a successful mutation, shown on the next
/// rendered page, then gone.
pub trait FlashStore: Send + Sync {
    fn push(&self, session_id: &str, notice: String);

    fn drain(&self, session_id: &str) -> Vec<String>;
}

pub struct MemoryFlash {
    notices: Mutex<SessionMap<Vec<String>>>,
}

impl MemoryFlash {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_limits(Self::DEFAULT_TTL, Self::DEFAULT_CAPACITY)
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            notices: Mutex::new(SessionMap::new(ttl, capacity)),
        }
    }

    /// Sessions with undelivered notices.
    pub fn len(&self) -> usize {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashStore for MemoryFlash {
    fn push(&self, session_id: &str, notice: String) {
        let mut notices = self.notices.lock().unwrap_or_else(PoisonError::into_inner);
        notices.get_or_insert_with(session_id, Vec::new).push(notice);
    }

    fn drain(&self, session_id: &str) -> Vec<String> {
        let mut notices = self.notices.lock().unwrap_or_else(PoisonError::into_inner);
        notices.take(session_id).unwrap_or_default()
    }
}
