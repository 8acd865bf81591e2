//! Exclusive session ↔ task pairing
//!
//! Both directions live in one record behind one leaf lock, so "at most one task
//! per session and one session per task" holds by construction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BindError;
use crate::nag::{Nag, NagId};
use crate::session::SessionId;

#[derive(Default)]
struct BindingTable {
    by_session: HashMap<SessionId, Arc<Nag>>,
    by_nag: HashMap<NagId, SessionId>,
}

#[derive(Default)]
pub struct Bindings {
    table: Mutex<BindingTable>,
}

impl Bindings {
    pub fn bind(&self, session: SessionId, nag: Arc<Nag>) -> Result<(), BindError> {
        let mut table = self.table.lock();
        if table.by_session.contains_key(&session) {
            return Err(BindError::SessionBusy(session));
        }
        if let Some(&owner) = table.by_nag.get(&nag.id()) {
            return Err(BindError::NagBusy(nag.id(), owner));
        }
        table.by_nag.insert(nag.id(), session);
        table.by_session.insert(session, nag);
        Ok(())
    }

    /// Drops the session's binding and hands back the task it held.
    pub fn release_session(&self, session: SessionId) -> Option<Arc<Nag>> {
        let mut table = self.table.lock();
        let nag = table.by_session.remove(&session)?;
        table.by_nag.remove(&nag.id());
        Some(nag)
    }

    pub fn session_of(&self, nag: NagId) -> Option<SessionId> {
        self.table.lock().by_nag.get(&nag).copied()
    }

    pub fn nag_of(&self, session: SessionId) -> Option<Arc<Nag>> {
        self.table.lock().by_session.get(&session).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
