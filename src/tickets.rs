//! Fetch and save tickets.
//!
//! A ticket stands in for a promise: it is handed out immediately and
//! settles when the run loop performs the underlying work. Tickets can be
//! composed so one settles when a set of others has.

use crate::error::{Result, StoreError};
use crate::types::{ArrayId, FetchTicket, ModelId};
use std::collections::HashMap;

/// Value a ticket resolves with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketValue {
    Record(Option<ModelId>),
    Records(Vec<ModelId>),
    ManyArray { owner: ModelId, key: String },
    RecordArray(ArrayId),
}

impl TicketValue {
    pub fn record(&self) -> Option<ModelId> {
        match self {
            TicketValue::Record(r) => *r,
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum TicketState {
    Pending,
    Resolved(TicketValue),
    Rejected(StoreError),
    /// The record the work was for was destroyed first.
    Abandoned,
}

impl TicketState {
    pub fn is_pending(&self) -> bool {
        matches!(self, TicketState::Pending)
    }
}

/// Dependencies of a composite ticket.
#[derive(Debug)]
struct AllOf {
    deps: Vec<FetchTicket>,
    value: TicketValue,
}

#[derive(Debug)]
struct Entry {
    state: TicketState,
    waiting: Option<AllOf>,
}

/// Owns every ticket handed out by a store.
#[derive(Debug, Default)]
pub struct TicketTable {
    entries: HashMap<FetchTicket, Entry>,
    /// Composite tickets to re-check when a ticket settles.
    dependents: HashMap<FetchTicket, Vec<FetchTicket>>,
    next_id: u64,
}

impl TicketTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self) -> FetchTicket {
        self.next_id += 1;
        let ticket = FetchTicket(self.next_id);
        self.entries.insert(
            ticket,
            Entry {
                state: TicketState::Pending,
                waiting: None,
            },
        );
        ticket
    }

    pub fn resolved(&mut self, value: TicketValue) -> FetchTicket {
        let ticket = self.create();
        self.resolve(ticket, value);
        ticket
    }

    pub fn rejected(&mut self, error: StoreError) -> FetchTicket {
        let ticket = self.create();
        self.reject(ticket, error);
        ticket
    }

    /// A ticket resolving with `value` once every dependency resolves.
    pub fn after_all(&mut self, deps: Vec<FetchTicket>, value: TicketValue) -> FetchTicket {
        let ticket = self.create();
        self.wait_for_all(ticket, deps, value);
        ticket
    }

    /// Make a pending ticket settle once every dependency resolves.
    ///
    /// The first rejection among the dependencies rejects it.
    pub fn wait_for_all(&mut self, ticket: FetchTicket, deps: Vec<FetchTicket>, value: TicketValue) {
        for dep in &deps {
            self.dependents.entry(*dep).or_default().push(ticket);
        }
        if let Some(entry) = self.entries.get_mut(&ticket) {
            entry.waiting = Some(AllOf { deps, value });
        }
        self.propagate(vec![ticket]);
    }

    pub fn resolve(&mut self, ticket: FetchTicket, value: TicketValue) {
        self.settle(ticket, TicketState::Resolved(value));
    }

    pub fn reject(&mut self, ticket: FetchTicket, error: StoreError) {
        self.settle(ticket, TicketState::Rejected(error));
    }

    pub fn abandon(&mut self, ticket: FetchTicket) {
        self.settle(ticket, TicketState::Abandoned);
    }

    pub fn state(&self, ticket: FetchTicket) -> Result<&TicketState> {
        self.entries
            .get(&ticket)
            .map(|e| &e.state)
            .ok_or(StoreError::UnknownTicket(ticket))
    }

    pub fn is_pending(&self, ticket: FetchTicket) -> bool {
        self.state(ticket).map_or(false, TicketState::is_pending)
    }

    /// The settled outcome of a ticket.
    pub fn result(&self, ticket: FetchTicket) -> Result<TicketValue> {
        match self.state(ticket)? {
            TicketState::Resolved(value) => Ok(value.clone()),
            TicketState::Rejected(error) => Err(error.clone()),
            TicketState::Pending => Err(StoreError::TicketPending(ticket)),
            TicketState::Abandoned => Err(StoreError::TicketAbandoned(ticket)),
        }
    }

    /// Drop a settled ticket. Its id is unknown afterwards.
    pub fn release(&mut self, ticket: FetchTicket) -> Result<TicketState> {
        if self.state(ticket)?.is_pending() {
            return Err(StoreError::TicketPending(ticket));
        }
        self.dependents.remove(&ticket);
        self.entries
            .remove(&ticket)
            .map(|entry| entry.state)
            .ok_or(StoreError::UnknownTicket(ticket))
    }

    /// Tickets held, settled or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state.is_pending())
            .count()
    }

    /// Settled state is final; later attempts are ignored.
    fn settle(&mut self, ticket: FetchTicket, state: TicketState) {
        match self.entries.get_mut(&ticket) {
            Some(entry) if entry.state.is_pending() => {
                entry.state = state;
                entry.waiting = None;
            }
            _ => return,
        }
        let dependents = self.dependents.remove(&ticket).unwrap_or_default();
        self.propagate(dependents);
    }

    fn evaluate(&self, ticket: FetchTicket) -> Option<TicketState> {
        let entry = self.entries.get(&ticket)?;
        if !entry.state.is_pending() {
            return None;
        }
        let AllOf { deps, value } = entry.waiting.as_ref()?;
        let mut all_resolved = true;
        for dep in deps {
            // A released dependency had resolved; failures settle the
            // composite before release is possible.
            match self.entries.get(dep).map(|e| &e.state) {
                Some(TicketState::Rejected(error)) => return Some(TicketState::Rejected(error.clone())),
                Some(TicketState::Abandoned) => return Some(TicketState::Abandoned),
                Some(TicketState::Pending) => all_resolved = false,
                Some(TicketState::Resolved(_)) | None => {}
            }
        }
        all_resolved.then(|| TicketState::Resolved(value.clone()))
    }

    fn propagate(&mut self, mut work: Vec<FetchTicket>) {
        while let Some(ticket) = work.pop() {
            if let Some(state) = self.evaluate(ticket) {
                if let Some(entry) = self.entries.get_mut(&ticket) {
                    entry.state = state;
                    entry.waiting = None;
                }
                if let Some(more) = self.dependents.remove(&ticket) {
                    work.extend(more);
                }
            }
        }
    }
}
