use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::info;

use crate::session::{ActionGroup, ActionHandler, ActionId, Language, Voice, VoiceSession};

/// Number of triggered actions kept for `GET /actions`
const ACTION_LOG_CAPACITY: usize = 100;

/// One action the assistant triggered
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action: ActionId,
    pub group: ActionGroup,
    pub triggered_at: DateTime<Utc>,
}

/// Most recent actions, newest last.
///
/// Serves as the kiosk's action callback: the portal front end polls
/// `GET /actions` and presses the matching button.
#[derive(Clone, Default)]
pub struct ActionLog {
    records: Arc<Mutex<VecDeque<ActionRecord>>>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recent(&self) -> Vec<ActionRecord> {
        match self.records.lock() {
            Ok(records) => records.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl ActionHandler for ActionLog {
    fn on_action(&self, action: ActionId) -> anyhow::Result<()> {
        let record = ActionRecord {
            action,
            group: action.group(),
            triggered_at: Utc::now(),
        };
        info!("Portal action: {} ({:?})", action, record.group);

        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("action log lock poisoned"))?;
        if records.len() == ACTION_LOG_CAPACITY {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }
}

/// What the portal currently shows
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PortalSelection {
    pub voice: Voice,
    pub language: Language,
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub session: VoiceSession,
    pub selection: Arc<RwLock<PortalSelection>>,
    pub actions: ActionLog,
}

impl AppState {
    pub fn new(session: VoiceSession, selection: PortalSelection, actions: ActionLog) -> Self {
        Self {
            session,
            selection: Arc::new(RwLock::new(selection)),
            actions,
        }
    }
}
