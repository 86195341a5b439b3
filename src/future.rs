use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::client::{Session, Writer, send_release};
use crate::error::LoomError;
use crate::payload::Payload;
use crate::task::TaskId;

/// Where a remote task is in its lifecycle, as far as this client knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Running,
    Finished,
    /// Finished and freed on the coordinator.
    Released,
    /// Released by the caller before the coordinator reported it finished.
    /// The release goes out once the finish notice arrives.
    Canceled,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Running => "running",
            Status::Finished => "finished",
            Status::Released => "released",
            Status::Canceled => "canceled",
        })
    }
}

struct State {
    status: Status,
    result: Option<Payload>,
}

pub(crate) struct FutureInner {
    id: TaskId,
    state: Mutex<State>,
    session: Weak<Mutex<Session>>,
    writer: Weak<Mutex<Writer>>,
}

impl FutureInner {
    pub(crate) fn new(
        id: TaskId,
        session: Weak<Mutex<Session>>,
        writer: Weak<Mutex<Writer>>,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(State {
                status: Status::Running,
                result: None,
            }),
            session,
            writer,
        }
    }
}

impl Drop for FutureInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        // A future dropped while running is released by the session once the
        // finish notice comes in.
        if state.status != Status::Finished {
            return;
        }

        if let Some(writer) = self.writer.upgrade() {
            match send_release(&writer, self.id) {
                Ok(()) => tracing::debug!(id = self.id, "released on drop"),
                Err(err) => tracing::warn!(id = self.id, "release on drop failed: {err}"),
            }
        }
    }
}

/// Client-side handle of a task submitted to the coordinator.
///
/// Clones share the same state. When the last clone goes away without an
/// explicit [`release`](Self::release), the remote result is released in the
/// background.
#[derive(Clone)]
pub struct Future {
    inner: Arc<FutureInner>,
}

impl Future {
    pub(crate) fn from_inner(inner: Arc<FutureInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<FutureInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn belongs_to(&self, session: &Weak<Mutex<Session>>) -> bool {
        Weak::ptr_eq(&self.inner.session, session)
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn status(&self) -> Status {
        self.inner.state.lock().unwrap().status
    }

    /// Finished and not released.
    pub fn is_finished(&self) -> bool {
        self.status() == Status::Finished
    }

    pub fn is_running(&self) -> bool {
        self.status() == Status::Running
    }

    /// Running or finished, i.e. usable as an input of a new submission.
    pub fn is_active(&self) -> bool {
        matches!(self.status(), Status::Running | Status::Finished)
    }

    pub fn is_released(&self) -> bool {
        matches!(self.status(), Status::Released | Status::Canceled)
    }

    pub fn has_result(&self) -> bool {
        self.inner.state.lock().unwrap().result.is_some()
    }

    pub(crate) fn cached(&self) -> Option<Payload> {
        self.inner.state.lock().unwrap().result.clone()
    }

    pub(crate) fn set_finished(&self) -> Result<(), LoomError> {
        let mut state = self.inner.state.lock().unwrap();
        match state.status {
            Status::Running => {
                state.status = Status::Finished;
                Ok(())
            }
            status => Err(LoomError::InvalidFutureState {
                id: self.inner.id,
                status,
            }),
        }
    }

    pub(crate) fn set_result(&self, payload: Payload) -> Result<(), LoomError> {
        let mut state = self.inner.state.lock().unwrap();
        match state.status {
            Status::Finished => {
                state.result = Some(payload);
                Ok(())
            }
            status => Err(LoomError::InvalidFutureState {
                id: self.inner.id,
                status,
            }),
        }
    }

    fn session(&self) -> Result<Arc<Mutex<Session>>, LoomError> {
        self.inner
            .session
            .upgrade()
            .ok_or_else(LoomError::connection_closed)
    }

    /// Blocks until the coordinator reports the task finished.
    ///
    /// A `TASK_FAILED` for this task is returned once as
    /// [`LoomError::TaskFailed`]. The future stays running afterwards and no
    /// finish notice follows, so waiting on it again only returns when the
    /// connection goes away. There is no timeout; a watchdog holding a
    /// [`Terminator`](crate::Terminator) can end the wait.
    pub fn wait(&self) -> Result<(), LoomError> {
        self.session()?.lock().unwrap().wait_one(self)
    }

    /// Waits for the task and downloads its result. The result is cached, so
    /// later calls don't touch the network.
    pub fn fetch(&self) -> Result<Payload, LoomError> {
        self.session()?.lock().unwrap().fetch_one(self)
    }

    /// [`fetch`](Self::fetch) followed by [`release`](Self::release).
    pub fn gather(&self) -> Result<Payload, LoomError> {
        let payload = self.fetch()?;
        self.release()?;
        Ok(payload)
    }

    /// Frees the result on the coordinator. Releasing twice is a no-op.
    ///
    /// A running task is only marked canceled here; the coordinator is told
    /// once it reports the task finished.
    pub fn release(&self) -> Result<(), LoomError> {
        let mut state = self.inner.state.lock().unwrap();

        match state.status {
            Status::Finished => {
                let writer = self
                    .inner
                    .writer
                    .upgrade()
                    .ok_or_else(LoomError::connection_closed)?;
                send_release(&writer, self.inner.id)?;
                state.status = Status::Released;
                tracing::debug!(id = self.inner.id, "released");
            }
            Status::Running => {
                state.status = Status::Canceled;
                tracing::debug!(id = self.inner.id, "canceled, release deferred");
            }
            Status::Released | Status::Canceled => {}
        }

        Ok(())
    }
}

impl PartialEq for Future {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Future {}

impl std::hash::Hash for Future {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl std::fmt::Debug for Future {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        write!(
            f,
            "<Future task_id={} {}{}>",
            self.inner.id,
            state.status,
            if state.result.is_some() { " R" } else { "" }
        )
    }
}
