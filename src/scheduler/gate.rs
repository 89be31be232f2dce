//! Access priority gate: tiered admission for reservation writes.
//!
//! Two exclusion permits and two cohorts:
//!
//! - *admin-exclusion* (a mutex) is held by the student cohort as a unit and
//!   by each faculty member.
//! - *faculty-exclusion* (a read/write lock) is held exclusively by the admin
//!   cohort as a unit and by each faculty member, and in shared mode by every
//!   admitted student.
//!
//! A cohort's permit is taken on the 0→1 transition of its live count and
//! returned on 1→0, with the count guarded by its own small mutex. Students
//! and admins therefore run alongside their own tier, faculty run alone, and
//! students never overlap admins.
//!
//! Every tier acquires in the same order: turnstile, student counter,
//! admin-exclusion, admin counter, faculty-exclusion. A queued faculty member
//! holds the turnstile, which stops new students from joining a live cohort
//! and starving it. Admins never touch the turnstile.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use crate::model::Tier;
use crate::observability;

struct Cohort<P> {
    live: usize,
    permit: Option<P>,
}

impl<P> Cohort<P> {
    fn new() -> Self {
        Self { live: 0, permit: None }
    }

    fn leave(&mut self) {
        debug_assert!(self.live > 0, "cohort underflow");
        self.live -= 1;
        if self.live == 0 {
            self.permit = None;
        }
    }
}

struct GateState {
    turnstile: Mutex<()>,
    admin_exclusion: Arc<Mutex<()>>,
    faculty_exclusion: Arc<RwLock<()>>,
    students: Mutex<Cohort<OwnedMutexGuard<()>>>,
    admins: Mutex<Cohort<OwnedRwLockWriteGuard<()>>>,
}

impl GateState {
    async fn leave(&self, tier: Tier) {
        match tier {
            Tier::Student => self.students.lock().await.leave(),
            Tier::Admin => self.admins.lock().await.leave(),
            Tier::Faculty => {}
        }
    }

    /// Leave without awaiting if the counter lock is free.
    fn try_leave(&self, tier: Tier) -> bool {
        match tier {
            Tier::Student => self.students.try_lock().map(|mut c| c.leave()).is_ok(),
            Tier::Admin => self.admins.try_lock().map(|mut c| c.leave()).is_ok(),
            Tier::Faculty => true,
        }
    }
}

enum Hold {
    /// The shared guard is absent only while admission is still in progress.
    Student(Option<OwnedRwLockReadGuard<()>>),
    Faculty {
        _admin: OwnedMutexGuard<()>,
        _faculty: OwnedRwLockWriteGuard<()>,
    },
    Admin,
    Released,
}

/// Proof of admission. Release with [`GatePermit::release`]; dropping it
/// also releases, including when an acquisition is cancelled midway.
#[must_use = "dropping a permit releases it immediately"]
pub struct GatePermit {
    tier: Tier,
    state: Arc<GateState>,
    hold: Hold,
}

impl GatePermit {
    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub async fn release(mut self) {
        match std::mem::replace(&mut self.hold, Hold::Released) {
            Hold::Student(shared) => {
                drop(shared);
                self.state.leave(Tier::Student).await;
            }
            Hold::Admin => self.state.leave(Tier::Admin).await,
            Hold::Faculty { .. } | Hold::Released => {}
        }
    }
}

impl fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hold = match &self.hold {
            Hold::Student(Some(_)) => "student",
            Hold::Student(None) => "student (admitting)",
            Hold::Faculty { .. } => "faculty",
            Hold::Admin => "admin",
            Hold::Released => "released",
        };
        f.debug_struct("GatePermit")
            .field("tier", &self.tier)
            .field("hold", &hold)
            .finish()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let tier = match std::mem::replace(&mut self.hold, Hold::Released) {
            Hold::Student(shared) => {
                drop(shared);
                Tier::Student
            }
            Hold::Admin => Tier::Admin,
            Hold::Faculty { .. } | Hold::Released => return,
        };
        if self.state.try_leave(tier) {
            return;
        }
        let state = self.state.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { state.leave(tier).await });
            }
            Err(_) => warn!("gate: {tier} permit dropped outside a runtime, cohort slot leaked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTimeout {
    pub tier: Tier,
    pub waited: Duration,
}

impl fmt::Display for GateTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} admission timed out after {:?}", self.tier, self.waited)
    }
}

impl std::error::Error for GateTimeout {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    pub students: usize,
    pub admins: usize,
}

/// Shared handle to one gate. Clones admit against the same state.
#[derive(Clone)]
pub struct AccessGate {
    state: Arc<GateState>,
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGate {
    pub fn new() -> Self {
        Self {
            state: Arc::new(GateState {
                turnstile: Mutex::new(()),
                admin_exclusion: Arc::new(Mutex::new(())),
                faculty_exclusion: Arc::new(RwLock::new(())),
                students: Mutex::new(Cohort::new()),
                admins: Mutex::new(Cohort::new()),
            }),
        }
    }

    /// Wait (without bound) until `tier` may write.
    pub async fn acquire(&self, tier: Tier) -> GatePermit {
        let started = Instant::now();
        let permit = match tier {
            Tier::Student => self.admit_student().await,
            Tier::Faculty => self.admit_faculty().await,
            Tier::Admin => self.admit_admin().await,
        };
        let waited = started.elapsed();
        metrics::histogram!(observability::GATE_WAIT_SECONDS, "tier" => tier.label())
            .record(waited.as_secs_f64());
        debug!("gate: admitted {tier} after {waited:?}");
        permit
    }

    /// Like [`acquire`](Self::acquire) but gives up after `limit`. A timed
    /// out attempt holds nothing afterwards.
    pub async fn acquire_timeout(
        &self,
        tier: Tier,
        limit: Duration,
    ) -> Result<GatePermit, GateTimeout> {
        tokio::time::timeout(limit, self.acquire(tier))
            .await
            .map_err(|_| {
                metrics::counter!(observability::GATE_TIMEOUTS_TOTAL, "tier" => tier.label())
                    .increment(1);
                GateTimeout { tier, waited: limit }
            })
    }

    /// Current cohort sizes.
    pub async fn occupancy(&self) -> Occupancy {
        Occupancy {
            students: self.state.students.lock().await.live,
            admins: self.state.admins.lock().await.live,
        }
    }

    async fn admit_student(&self) -> GatePermit {
        drop(self.state.turnstile.lock().await);
        {
            let mut cohort = self.state.students.lock().await;
            if cohort.live == 0 {
                cohort.permit = Some(self.state.admin_exclusion.clone().lock_owned().await);
            }
            cohort.live += 1;
        }
        // Cohort slot is taken: from here a dropped permit gives it back.
        let mut permit = GatePermit {
            tier: Tier::Student,
            state: self.state.clone(),
            hold: Hold::Student(None),
        };
        let shared = self.state.faculty_exclusion.clone().read_owned().await;
        permit.hold = Hold::Student(Some(shared));
        permit
    }

    async fn admit_faculty(&self) -> GatePermit {
        let turn = self.state.turnstile.lock().await;
        let admin = self.state.admin_exclusion.clone().lock_owned().await;
        let faculty = self.state.faculty_exclusion.clone().write_owned().await;
        drop(turn);
        GatePermit {
            tier: Tier::Faculty,
            state: self.state.clone(),
            hold: Hold::Faculty {
                _admin: admin,
                _faculty: faculty,
            },
        }
    }

    async fn admit_admin(&self) -> GatePermit {
        {
            let mut cohort = self.state.admins.lock().await;
            if cohort.live == 0 {
                cohort.permit = Some(self.state.faculty_exclusion.clone().write_owned().await);
            }
            cohort.live += 1;
        }
        GatePermit {
            tier: Tier::Admin,
            state: self.state.clone(),
            hold: Hold::Admin,
        }
    }
}
