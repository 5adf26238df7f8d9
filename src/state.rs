use crate::config::Config;

/// Children one adult may supervise while the capacity rule is in force.
pub const CHILDREN_PER_ADULT: u32 = 3;

/// Counters shared by every worker of a run. Only ever touched through a
/// [`crate::center::Section`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SharedState {
    pub adults_present: u32,
    pub children_present: u32,
    pub adults_blocked_to_leave: u32,
    pub children_waiting_to_enter: u32,
    pub child_seq: u32,
    pub adult_seq: u32,
    pub event_seq: u64,
    pub departed: u32,
    /// Set once the last configured adult has left; never cleared.
    pub child_day: bool,

    pub adult_count: u32,
    pub child_count: u32,
    pub adult_work_ms: u32,
    pub child_work_ms: u32,
}

impl SharedState {
    pub fn new(config: &Config) -> Self {
        Self {
            // with no adults configured nobody would ever start child day
            child_day: config.adults == 0,
            adult_count: config.adults,
            child_count: config.children,
            adult_work_ms: config.adult_work_ms,
            child_work_ms: config.child_work_ms,
            ..Self::default()
        }
    }

    pub fn total_workers(&self) -> u32 {
        self.adult_count + self.child_count
    }

    /// `children <= 3 * adults`, or child day.
    pub fn capacity_holds(&self) -> bool {
        self.child_day || self.children_present <= capacity(self.adults_present)
    }

    /// Whether one more child fits right now.
    pub fn child_may_enter(&self) -> bool {
        self.child_day || self.children_present < capacity(self.adults_present)
    }

    /// Whether the children present would still be covered with one adult less.
    pub fn adult_may_leave(&self) -> bool {
        self.child_day
            || self.children_present <= capacity(self.adults_present.saturating_sub(1))
    }

    pub fn is_last_departure(&self) -> bool {
        self.departed == self.total_workers()
    }

    pub(crate) fn next_child_id(&mut self) -> u32 {
        self.child_seq += 1;
        self.child_seq
    }

    pub(crate) fn next_adult_id(&mut self) -> u32 {
        self.adult_seq += 1;
        self.adult_seq
    }

    /// Moves up to `limit` waiting children inside, returning how many moved.
    /// The caller owes that many permits to the child admission queue.
    pub(crate) fn admit_waiting(&mut self, limit: u32) -> u32 {
        let n = self.children_waiting_to_enter.min(limit);
        self.children_waiting_to_enter -= n;
        self.children_present += n;
        n
    }

    /// Lets one blocked adult go if the remaining adults still cover the
    /// children present. The freed adult stops counting immediately.
    pub(crate) fn release_blocked_adult(&mut self) -> bool {
        if self.adults_blocked_to_leave == 0 || !self.adult_may_leave() {
            return false;
        }
        self.adults_blocked_to_leave -= 1;
        self.adults_present -= 1;
        true
    }
}

fn capacity(adults: u32) -> u32 {
    adults.saturating_mul(CHILDREN_PER_ADULT)
}
