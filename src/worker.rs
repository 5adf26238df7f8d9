//! The two worker protocols.
//!
//! Each worker performs its state changes in short critical sections and only
//! ever blocks (on a pool or while occupying the center) with the lock
//! released.

use std::{thread, time::Duration};

use rand::Rng;

use crate::{
    center::{Center, Pool},
    error::Result,
    event::{Action, EventLog, Role},
    state::CHILDREN_PER_ADULT,
};

/// Runs one worker of kind `role` to completion: arrive, enter, occupy, leave,
/// wait for everybody else to leave, finish. Returns the identifier it was
/// given.
pub fn run(center: &Center, log: &dyn EventLog, role: Role) -> Result<u32> {
    match role {
        Role::Adult => adult(center, log),
        Role::Child => child(center, log),
    }
}

fn child(center: &Center, log: &dyn EventLog) -> Result<u32> {
    let (id, work_ms) = {
        let mut s = center.lock()?;
        let id = s.next_child_id();
        s.record(log, Role::Child, id, Action::Started);
        (id, s.child_work_ms)
    };

    let admitted = {
        let mut s = center.lock()?;
        if s.child_may_enter() {
            s.children_present += 1;
            s.record(log, Role::Child, id, Action::Enter);
            true
        } else {
            s.children_waiting_to_enter += 1;
            s.record(log, Role::Child, id, Action::Waiting);
            false
        }
    };

    if !admitted {
        // whoever released us already counted us as present
        center.acquire(Pool::ChildAdmission)?;
        let mut s = center.lock()?;
        s.record(log, Role::Child, id, Action::Enter);
        center.release(Pool::Rendezvous, 1)?;
    }

    occupy(work_ms);

    let last = {
        let mut s = center.lock()?;
        s.record(log, Role::Child, id, Action::TryingToLeave);
        s.children_present -= 1;
        if s.release_blocked_adult() {
            center.release(Pool::AdultRelease, 1)?;
        }
        s.record(log, Role::Child, id, Action::Leave);
        s.departed += 1;
        s.is_last_departure()
    };

    finish(center, log, Role::Child, id, last)?;
    Ok(id)
}

fn adult(center: &Center, log: &dyn EventLog) -> Result<u32> {
    // Arrival and admissions share one section: the new adult's capacity goes
    // to children already waiting before any newcomer can claim it.
    let (id, work_ms, admitted, adult_count) = {
        let mut s = center.lock()?;
        let id = s.next_adult_id();
        s.record(log, Role::Adult, id, Action::Started);
        s.adults_present += 1;
        let admitted = s.admit_waiting(CHILDREN_PER_ADULT);
        center.release(Pool::ChildAdmission, admitted)?;
        s.record(log, Role::Adult, id, Action::Enter);
        (id, s.adult_work_ms, admitted, s.adult_count)
    };

    // don't try to leave before our children have actually come in
    for _ in 0..admitted {
        center.acquire(Pool::Rendezvous)?;
    }

    occupy(work_ms);

    let blocked = {
        let mut s = center.lock()?;
        s.record(log, Role::Adult, id, Action::TryingToLeave);
        if s.adult_may_leave() {
            s.adults_present -= 1;
            false
        } else {
            s.adults_blocked_to_leave += 1;
            s.record(log, Role::Adult, id, Action::Waiting);
            true
        }
    };

    if blocked {
        // the releasing child has already taken us off adults_present
        center.acquire(Pool::AdultRelease)?;
    }

    let last = {
        let mut s = center.lock()?;
        s.record(log, Role::Adult, id, Action::Leave);
        s.departed += 1;

        if id == adult_count {
            s.child_day = true;
            tracing::debug!(adult = id, "last adult left, child day begins");

            let mut admitted = 0;
            loop {
                let batch = s.admit_waiting(CHILDREN_PER_ADULT);
                if batch == 0 {
                    break;
                }
                center.release(Pool::ChildAdmission, batch)?;
                admitted += batch;
            }

            let mut freed = 0;
            while s.release_blocked_adult() {
                freed += 1;
            }
            center.release(Pool::AdultRelease, freed)?;
            tracing::debug!(admitted, freed, "child day released waiting workers");
        }

        s.is_last_departure()
    };

    finish(center, log, Role::Adult, id, last)?;
    Ok(id)
}

/// Shutdown barrier. The last worker to leave opens it; everyone else waits,
/// logs, and passes one more permit along.
fn finish(center: &Center, log: &dyn EventLog, role: Role, id: u32, last: bool) -> Result<()> {
    if last {
        let total = center.snapshot()?.total_workers();
        center.release(Pool::Shutdown, total.saturating_sub(1))?;
        let mut s = center.lock()?;
        s.record(log, role, id, Action::Finished);
        return Ok(());
    }

    center.acquire(Pool::Shutdown)?;
    {
        let mut s = center.lock()?;
        s.record(log, role, id, Action::Finished);
    }
    center.release(Pool::Shutdown, 1)
}

/// Sleeps for a uniformly random time in `[0, bound_ms)`.
pub(crate) fn occupy(bound_ms: u32) {
    if bound_ms == 0 {
        return;
    }
    let ms = rand::rng().random_range(0..bound_ms);
    thread::sleep(Duration::from_millis(u64::from(ms)));
}
