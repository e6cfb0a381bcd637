//! Connection resources with an explicit owner.
//!
//! A transport either owns its agent (built from its own configuration) or borrows one
//! (the process-wide HTTP/1.1 agents, an injected dispatcher). Only owned handles, or
//! borrowed ones explicitly marked for destruction, are destroyed when the transport closes.

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Borrowed,
}

/// What `release` did with the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The agent was destroyed; the owner should tear down anything it shares.
    Destroyed,
    /// The handle let go of a shared agent, which stays alive for its other users.
    Detached,
    /// Already released.
    Empty,
}

#[derive(Debug)]
pub struct AgentHandle<T> {
    agent: Mutex<Option<T>>,
    ownership: Ownership,
    destroy_borrowed: bool,
}

impl<T: Clone> AgentHandle<T> {
    pub fn owned(agent: T) -> Self {
        Self {
            agent: Mutex::new(Some(agent)),
            ownership: Ownership::Owned,
            destroy_borrowed: false,
        }
    }

    /// Wrap a shared agent. `destroy` opts into destroying it anyway on release.
    pub fn borrowed(agent: T, destroy: bool) -> Self {
        Self {
            agent: Mutex::new(Some(agent)),
            ownership: Ownership::Borrowed,
            destroy_borrowed: destroy,
        }
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// The agent, or `None` once released.
    pub fn get(&self) -> Option<T> {
        self.agent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn release(&self) -> Release {
        let taken = self
            .agent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match (taken, self.ownership) {
            (None, _) => Release::Empty,
            (Some(_), Ownership::Owned) => Release::Destroyed,
            (Some(_), Ownership::Borrowed) if self.destroy_borrowed => Release::Destroyed,
            (Some(_), Ownership::Borrowed) => Release::Detached,
        }
    }
}
