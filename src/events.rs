use std::sync::Arc;

use crate::thread::{Thread, ThreadId};

/// Buffered events per subscriber before the slowest one starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications for presentation-layer subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// Dead sessions were started again under their existing names.
    SessionsRecreated {
        thread_id: ThreadId,
        sessions: Vec<String>,
    },
    /// An agent finished; carries every unread session of the thread.
    AgentCompletion {
        thread_id: ThreadId,
        unread_sessions: Vec<String>,
    },
    AgentWaiting {
        thread_id: ThreadId,
        waiting_sessions: Vec<String>,
    },
    AgentBusy {
        thread_id: ThreadId,
        busy_sessions: Vec<String>,
    },
    /// The thread list changed.
    ThreadsUpdated { threads: Arc<Vec<Thread>> },
    /// A session failed its liveness probe or recreation repeatedly.
    SessionUnhealthy {
        thread_id: ThreadId,
        session: String,
        failures: u32,
        error: String,
    },
}

impl OrchestratorEvent {
    pub fn thread_id(&self) -> Option<ThreadId> {
        match self {
            Self::SessionsRecreated { thread_id, .. }
            | Self::AgentCompletion { thread_id, .. }
            | Self::AgentWaiting { thread_id, .. }
            | Self::AgentBusy { thread_id, .. }
            | Self::SessionUnhealthy { thread_id, .. } => Some(*thread_id),
            Self::ThreadsUpdated { .. } => None,
        }
    }
}
