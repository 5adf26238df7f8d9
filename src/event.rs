//! Event records and the sinks they are written to.
//!
//! Records are produced inside the critical section that performed the state
//! change, so the order sinks observe is the true global order.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::Mutex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Adult,
    Child,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Adult => "adult",
            Role::Child => "child",
        }
    }

    fn tag(&self) -> char {
        match self {
            Role::Adult => 'A',
            Role::Child => 'C',
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adult" => Ok(Role::Adult),
            "child" => Ok(Role::Child),
            other => Err(format!("unknown worker kind {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Started,
    Enter,
    Waiting,
    TryingToLeave,
    Leave,
    Finished,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Started => "started",
            Action::Enter => "enter",
            Action::Waiting => "waiting",
            Action::TryingToLeave => "trying to leave",
            Action::Leave => "leave",
            Action::Finished => "finished",
        }
    }
}

/// One logged transition plus the counts in effect when it was logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub seq: u64,
    pub role: Role,
    pub id: u32,
    pub action: Action,
    pub adults: u32,
    pub children: u32,
    pub child_day: bool,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t\t: {} {}\t: {}",
            self.seq,
            self.role.tag(),
            self.id,
            self.action.as_str()
        )?;
        if self.action == Action::Waiting {
            write!(f, " : {} : {}", self.adults, self.children)?;
        }
        Ok(())
    }
}

/// Destination for event records. Called with the arbitration lock held.
pub trait EventLog: Send + Sync {
    fn append(&self, event: &Event) -> io::Result<()>;
}

/// Append-only, unbuffered file log shared by every process of a run.
pub struct FileLog {
    file: File,
}

impl FileLog {
    /// Truncates (or creates) the log. Called once by the supervisor.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Opens an existing log for appending. Called by each worker process.
    pub fn append_to(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl EventLog for FileLog {
    fn append(&self, event: &Event) -> io::Result<()> {
        // single write per line so O_APPEND keeps lines whole across processes
        let line = format!("{event}\n");
        (&self.file).write_all(line.as_bytes())
    }
}

/// In-process log, used by thread runs and tests.
#[derive(Default)]
pub struct MemoryLog {
    events: Mutex<Vec<Event>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventLog for MemoryLog {
    fn append(&self, event: &Event) -> io::Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| io::Error::other("event buffer poisoned"))?;
        events.push(*event);
        Ok(())
    }
}
