//! Server-side session registries.
//!
//! Each wizard session id (uuid v4) owns a [`MemorySession`], the
//! key/value store the wizard is persisted into between requests. Every
//! request restores the machine, applies one operation and saves it back.
//! Chat sessions are kept the same way, one [`ChatSession`] per id.
//!
//! Sessions live only as long as the process. Entries idle for longer
//! than the configured TTL are dropped on the next create or checkout,
//! and a wizard's entry is removed as soon as it completes.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ragdesk_core::wizard::session::{self, MemorySession};
use ragdesk_core::wizard::{Navigation, Step, UploadWizard, WizardVariant};
use ragdesk_core::{Metadata, WizardError};

use crate::chat::ChatSession;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// What a wizard operation found in the session.
pub enum Restored {
    Wizard(UploadWizard),
    /// No session, or its state is missing, expired or unreadable.
    Missing,
}

struct Entry<T> {
    value: T,
    touched: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, now: Instant) -> Self {
        Self {
            value,
            touched: now,
        }
    }

    fn is_idle(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.touched) >= ttl
    }
}

fn evict_idle<T>(map: &mut HashMap<String, Entry<T>>, ttl: Duration, now: Instant) -> usize {
    let before = map.len();
    map.retain(|_, e| !e.is_idle(ttl, now));
    before - map.len()
}

pub struct WizardSessions {
    stores: Mutex<HashMap<String, Entry<MemorySession>>>,
    ttl: Duration,
}

impl Default for WizardSessions {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl WizardSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Starts a wizard in step 1 and returns its session id.
    pub fn create(&self, variant: WizardVariant) -> Result<String, WizardError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut store = MemorySession::new();
        session::save(&mut store, &UploadWizard::new(variant))?;

        let now = Instant::now();
        let mut stores = self.lock();
        self.evict_locked(&mut stores, now);
        stores.insert(id.clone(), Entry::new(store, now));
        tracing::debug!(session = %id, ?variant, "wizard session created");
        Ok(id)
    }

    pub fn restore(&self, id: &str) -> Restored {
        self.restore_at(id, Instant::now())
    }

    fn restore_at(&self, id: &str, now: Instant) -> Restored {
        let mut stores = self.lock();
        let Some(entry) = stores.get_mut(id) else {
            return Restored::Missing;
        };
        if entry.is_idle(self.ttl, now) {
            stores.remove(id);
            tracing::debug!(session = id, "wizard session expired");
            return Restored::Missing;
        }
        entry.touched = now;
        match session::restore(&entry.value) {
            Ok(Some(w)) => Restored::Wizard(w),
            Ok(None) => Restored::Missing,
            Err(e) => {
                tracing::warn!(session = id, error = %e, "discarding unreadable wizard state");
                Restored::Missing
            }
        }
    }

    /// Writes the wizard back. A completed wizard drops the session.
    pub fn save(&self, id: &str, wizard: &UploadWizard) -> Result<(), WizardError> {
        let now = Instant::now();
        let mut stores = self.lock();
        let entry = stores
            .entry(id.to_string())
            .or_insert_with(|| Entry::new(MemorySession::new(), now));
        entry.touched = now;
        session::save(&mut entry.value, wizard)?;
        if entry.value.is_empty() {
            stores.remove(id);
        }
        Ok(())
    }

    /// Render-or-redirect for `step`, with the wizard restored once.
    ///
    /// Step 1 always renders. The wizard comes back only when the step
    /// renders.
    pub fn visit(&self, id: &str, step: Step) -> (Navigation, Option<UploadWizard>) {
        let wizard = match self.restore(id) {
            Restored::Wizard(w) => Some(w),
            Restored::Missing => None,
        };
        let navigation = match (&wizard, step) {
            (_, Step::CollectFiles) => Navigation::Render(Step::CollectFiles),
            (Some(w), _) => w.enter(step),
            (None, _) => Navigation::Redirect(Step::CollectFiles),
        };
        match navigation {
            Navigation::Render(_) => (navigation, wizard),
            Navigation::Redirect(_) => (navigation, None),
        }
    }

    /// Live sessions, idle ones included until the next eviction.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn evict_idle(&self, now: Instant) -> usize {
        let mut stores = self.lock();
        self.evict_locked(&mut stores, now)
    }

    fn evict_locked(
        &self,
        stores: &mut HashMap<String, Entry<MemorySession>>,
        now: Instant,
    ) -> usize {
        let evicted = evict_idle(stores, self.ttl, now);
        if evicted > 0 {
            tracing::debug!(evicted, "idle wizard sessions dropped");
        }
        evicted
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<MemorySession>>> {
        self.stores.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct ChatSessions {
    sessions: Mutex<HashMap<String, Entry<ChatSession>>>,
    ttl: Duration,
}

impl Default for ChatSessions {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl ChatSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Takes the session out for the duration of a dispatch. Unknown,
    /// expired or absent ids get a fresh session.
    pub fn checkout(&self, id: Option<&str>) -> (String, ChatSession) {
        self.checkout_at(id, Instant::now())
    }

    fn checkout_at(&self, id: Option<&str>, now: Instant) -> (String, ChatSession) {
        let mut sessions = self.lock();
        let evicted = evict_idle(&mut sessions, self.ttl, now);
        if evicted > 0 {
            tracing::debug!(evicted, "idle chat sessions dropped");
        }
        match id.and_then(|i| sessions.remove(i).map(|e| (i.to_string(), e.value))) {
            Some(found) => found,
            None => (
                id.map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                ChatSession::new(),
            ),
        }
    }

    pub fn checkin(&self, id: String, session: ChatSession) {
        self.checkin_at(id, session, Instant::now());
    }

    fn checkin_at(&self, id: String, session: ChatSession, now: Instant) {
        self.lock().insert(id, Entry::new(session, now));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<ChatSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// JSON view of a wizard for clients.
#[derive(Debug, Serialize)]
pub struct WizardView {
    pub session_id: String,
    pub variant: WizardVariant,
    pub step: u8,
    pub cliente: String,
    pub tipo: String,
    pub files: Vec<FileView>,
    pub tools: Vec<ToolView>,
    pub unassigned: Vec<String>,
    /// Uploads that submitting would send; present from review on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<PlannedUpload>>,
}

#[derive(Debug, Serialize)]
pub struct FileView {
    pub name: String,
    pub content_type: String,
    pub size: usize,
    pub tool: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ToolView {
    pub name: String,
    pub files: Vec<String>,
    pub is_expanded: bool,
    pub search_term: String,
    /// Files shown under this tool's search box.
    pub visible: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlannedUpload {
    pub name: String,
    pub metadata: Metadata,
}

impl WizardView {
    pub fn of(session_id: &str, wizard: &UploadWizard) -> Self {
        let mut view = WizardView {
            session_id: session_id.to_string(),
            variant: wizard.variant(),
            step: wizard.step().number(),
            cliente: String::new(),
            tipo: String::new(),
            files: Vec::new(),
            tools: Vec::new(),
            unassigned: Vec::new(),
            plan: None,
        };
        let Some(batch) = wizard.batch() else {
            return view;
        };

        view.cliente = batch.cliente.clone();
        view.tipo = batch.tipo.clone();
        view.files = batch
            .files
            .iter()
            .map(|f| FileView {
                name: f.name.clone(),
                content_type: f.content_type.clone(),
                size: f.size(),
                tool: batch.tool_of(&f.name).map(|t| t.name.clone()),
            })
            .collect();
        view.tools = batch
            .tools
            .iter()
            .map(|t| ToolView {
                name: t.name.clone(),
                files: t.files.iter().cloned().collect(),
                is_expanded: t.is_expanded,
                search_term: t.search_term.clone(),
                visible: t
                    .visible(batch.files.iter().map(|f| f.name.as_str()))
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            })
            .collect();
        view.unassigned = batch.unassigned().into_iter().map(str::to_string).collect();
        view.plan = wizard.plan().ok().map(|plan| {
            plan.into_iter()
                .map(|r| PlannedUpload {
                    name: r.name,
                    metadata: r.metadata,
                })
                .collect()
        });
        view
    }
}
