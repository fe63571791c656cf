//! In-memory history store
//!
//! Each conversation keeps committed entries plus at most one outstanding
//! proposal. A proposal is resolved exactly once, either by `commit` (which
//! appends the proposed entry followed by the committed block) or by
//! `discard`.

use super::ConversationEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Conversation {conversation_id} already has an outstanding proposal")]
    Conflict { conversation_id: String },
    #[error("Proposal {proposal_id} in conversation {conversation_id} was already resolved")]
    AlreadyCommitted {
        conversation_id: String,
        proposal_id: u64,
    },
    #[error("Proposal {proposal_id} is unknown to conversation {conversation_id}")]
    UnknownProposal {
        conversation_id: String,
        proposal_id: u64,
    },
}

/// Token returned by `propose`, required to commit or discard
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProposalHandle {
    conversation_id: String,
    proposal_id: u64,
}

impl ProposalHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn proposal_id(&self) -> u64 {
        self.proposal_id
    }
}

#[derive(Debug, Clone)]
struct Proposal {
    id: u64,
    entry: ConversationEntry,
}

/// History of a single conversation
#[derive(Debug, Default, Clone)]
pub struct TurnHistory {
    entries: Vec<ConversationEntry>,
    version: u64,
    pending: Option<Proposal>,
    next_proposal_id: u64,
}

impl TurnHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed entries in append order
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    /// Incremented on every commit
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_entry(&self) -> Option<&ConversationEntry> {
        self.pending.as_ref().map(|p| &p.entry)
    }

    fn propose(&mut self, entry: ConversationEntry) -> Option<u64> {
        if self.pending.is_some() {
            return None;
        }
        self.next_proposal_id += 1;
        let id = self.next_proposal_id;
        self.pending = Some(Proposal { id, entry });
        Some(id)
    }

    /// Remove the pending proposal if `proposal_id` names it
    fn resolve(&mut self, proposal_id: u64) -> Result<ConversationEntry, ResolveError> {
        if self.pending.as_ref().is_some_and(|p| p.id == proposal_id) {
            return self
                .pending
                .take()
                .map(|p| p.entry)
                .ok_or(ResolveError::Unknown);
        }
        if proposal_id > 0 && proposal_id <= self.next_proposal_id {
            Err(ResolveError::AlreadyResolved)
        } else {
            Err(ResolveError::Unknown)
        }
    }

    fn commit(
        &mut self,
        proposal_id: u64,
        entries: Vec<ConversationEntry>,
    ) -> Result<u64, ResolveError> {
        let proposed = self.resolve(proposal_id)?;
        self.entries.reserve(entries.len() + 1);
        self.entries.push(proposed);
        self.entries.extend(entries);
        self.version += 1;
        Ok(self.version)
    }
}

enum ResolveError {
    AlreadyResolved,
    Unknown,
}

/// Thread-safe store of all conversation histories
///
/// Cloning shares the underlying histories.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    conversations: Arc<Mutex<HashMap<String, TurnHistory>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TurnHistory>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage a tentative entry. Fails if the conversation already has one.
    pub fn propose(
        &self,
        conversation_id: &str,
        entry: ConversationEntry,
    ) -> Result<ProposalHandle, HistoryError> {
        let mut conversations = self.lock();
        let history = conversations.entry(conversation_id.to_string()).or_default();
        let proposal_id = history.propose(entry).ok_or_else(|| HistoryError::Conflict {
            conversation_id: conversation_id.to_string(),
        })?;
        Ok(ProposalHandle {
            conversation_id: conversation_id.to_string(),
            proposal_id,
        })
    }

    /// Append the proposed entry followed by `entries` in one step.
    ///
    /// Returns the new history version.
    pub fn commit(
        &self,
        handle: &ProposalHandle,
        entries: Vec<ConversationEntry>,
    ) -> Result<u64, HistoryError> {
        let mut conversations = self.lock();
        let history = conversations
            .get_mut(&handle.conversation_id)
            .ok_or_else(|| unknown(handle))?;
        history
            .commit(handle.proposal_id, entries)
            .map_err(|e| resolve_error(e, handle))
    }

    /// Drop the proposal without appending anything
    pub fn discard(&self, handle: &ProposalHandle) -> Result<(), HistoryError> {
        let mut conversations = self.lock();
        let history = conversations
            .get_mut(&handle.conversation_id)
            .ok_or_else(|| unknown(handle))?;
        history
            .resolve(handle.proposal_id)
            .map(|_| ())
            .map_err(|e| resolve_error(e, handle))
    }

    /// Copy of the committed entries. Pending proposals are not included.
    pub fn snapshot(&self, conversation_id: &str) -> Vec<ConversationEntry> {
        self.lock()
            .get(conversation_id)
            .map(|h| h.entries().to_vec())
            .unwrap_or_default()
    }

    pub fn version(&self, conversation_id: &str) -> u64 {
        self.lock()
            .get(conversation_id)
            .map_or(0, TurnHistory::version)
    }

    pub fn is_pending(&self, conversation_id: &str) -> bool {
        self.lock()
            .get(conversation_id)
            .is_some_and(TurnHistory::is_pending)
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn unknown(handle: &ProposalHandle) -> HistoryError {
    HistoryError::UnknownProposal {
        conversation_id: handle.conversation_id.clone(),
        proposal_id: handle.proposal_id,
    }
}

fn resolve_error(error: ResolveError, handle: &ProposalHandle) -> HistoryError {
    match error {
        ResolveError::AlreadyResolved => HistoryError::AlreadyCommitted {
            conversation_id: handle.conversation_id.clone(),
            proposal_id: handle.proposal_id,
        },
        ResolveError::Unknown => unknown(handle),
    }
}
