//! Session store
//!
//! Sessions live in process memory for their whole lifetime. The store
//! hands out `Arc<Mutex<Session>>` so the orchestrator can hold exactly
//! one in-flight turn per session while independent sessions proceed
//! concurrently.

use crate::error::{CoreError, Result};
use crate::models::{GenerationConfig, Turn};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub config: GenerationConfig,
    pub created_at: DateTime<Utc>,
    turns: Vec<Turn>,
}

impl Session {
    fn new(id: Uuid, config: GenerationConfig) -> Self {
        Self {
            id,
            config,
            created_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    /// Append-only: turns are never mutated or reordered after insertion.
    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, config: GenerationConfig) -> Uuid {
        let id = Uuid::new_v4();
        let session = Session::new(id, config.clamped());
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
        info!(session_id = %id, "Session created");
        id
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoreError::SessionNotFound(id))
    }

    /// Teardown. History is process-lifetime only and goes with it.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| info!(session_id = %id, "Session removed"))
            .ok_or(CoreError::SessionNotFound(id))
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
