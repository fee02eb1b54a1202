//! Server status bitmask.
//!
//! A server's role and availability is a set of independent flags held in a
//! single `AtomicU64`. Monitors flip bits; sessions and routers read a
//! snapshot. This layer enforces no exclusion between roles (a server may be
//! flagged both master and slave); that policy belongs to the monitor.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A single named status flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusBit {
    Running,
    Maintenance,
    Draining,
    Master,
    Slave,
    /// Synced cluster member.
    Joined,
    /// Former master whose status is kept while the cluster is degraded.
    WasMaster,
}

impl StatusBit {
    /// Every bit, in the order used when rendering a status string.
    pub const ALL: [StatusBit; 7] = [
        StatusBit::Maintenance,
        StatusBit::Draining,
        StatusBit::Master,
        StatusBit::Slave,
        StatusBit::Joined,
        StatusBit::WasMaster,
        StatusBit::Running,
    ];

    pub const fn mask(self) -> u64 {
        match self {
            StatusBit::Running => 1 << 0,
            StatusBit::Maintenance => 1 << 1,
            StatusBit::Draining => 1 << 2,
            StatusBit::Master => 1 << 3,
            StatusBit::Slave => 1 << 4,
            StatusBit::Joined => 1 << 5,
            StatusBit::WasMaster => 1 << 6,
        }
    }

    /// Display name used in status strings.
    pub const fn name(self) -> &'static str {
        match self {
            StatusBit::Running => "Running",
            StatusBit::Maintenance => "Maintenance",
            StatusBit::Draining => "Draining",
            StatusBit::Master => "Master",
            StatusBit::Slave => "Slave",
            StatusBit::Joined => "Synced",
            StatusBit::WasMaster => "Stale Status",
        }
    }

    /// Parse an admin/monitor token. Matching is case-insensitive.
    pub fn from_token(token: &str) -> Option<StatusBit> {
        const TOKENS: [(&str, StatusBit); 8] = [
            ("running", StatusBit::Running),
            ("master", StatusBit::Master),
            ("slave", StatusBit::Slave),
            ("synced", StatusBit::Joined),
            ("maintenance", StatusBit::Maintenance),
            ("maint", StatusBit::Maintenance),
            ("stale", StatusBit::WasMaster),
            ("drain", StatusBit::Draining),
        ];

        TOKENS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(token))
            .map(|(_, bit)| *bit)
    }
}

/// A set of status bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusBits(u64);

impl StatusBits {
    /// The empty set; also what an unrecognized status token parses to.
    pub const NONE: StatusBits = StatusBits(0);
    pub const RUNNING: StatusBits = StatusBits(StatusBit::Running.mask());
    pub const MAINTENANCE: StatusBits = StatusBits(StatusBit::Maintenance.mask());
    pub const DRAINING: StatusBits = StatusBits(StatusBit::Draining.mask());
    pub const MASTER: StatusBits = StatusBits(StatusBit::Master.mask());
    pub const SLAVE: StatusBits = StatusBits(StatusBit::Slave.mask());
    pub const JOINED: StatusBits = StatusBits(StatusBit::Joined.mask());
    pub const WAS_MASTER: StatusBits = StatusBits(StatusBit::WasMaster.mask());

    pub const fn from_raw(raw: u64) -> Self {
        StatusBits(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: StatusBits) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn iter(self) -> impl Iterator<Item = StatusBit> {
        StatusBit::ALL
            .into_iter()
            .filter(move |bit| self.0 & bit.mask() != 0)
    }
}

impl From<StatusBit> for StatusBits {
    fn from(bit: StatusBit) -> Self {
        StatusBits(bit.mask())
    }
}

impl BitOr for StatusBits {
    type Output = StatusBits;

    fn bitor(self, rhs: StatusBits) -> StatusBits {
        StatusBits(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusBits {
    fn bitor_assign(&mut self, rhs: StatusBits) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StatusBits {
    type Output = StatusBits;

    fn bitand(self, rhs: StatusBits) -> StatusBits {
        StatusBits(self.0 & rhs.0)
    }
}

impl Not for StatusBits {
    type Output = StatusBits;

    fn not(self) -> StatusBits {
        StatusBits(!self.0)
    }
}

impl fmt::Debug for StatusBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(StatusBit::name)).finish()
    }
}

/// Map a status token to its bit.
///
/// Returns [`StatusBits::NONE`] for anything unrecognized; callers must treat
/// that as "no change".
pub fn status_from_string(token: &str) -> StatusBits {
    StatusBit::from_token(token)
        .map(StatusBits::from)
        .unwrap_or(StatusBits::NONE)
}

/// Render a status set as text, e.g. `"Master, Running"`.
///
/// A set without the running bit is reported as down.
pub fn status_to_string(bits: StatusBits) -> String {
    let mut names: Vec<&str> = bits.iter().map(StatusBit::name).collect();
    if !bits.contains(StatusBits::RUNNING) {
        names.push("Down");
    }
    names.join(", ")
}

/// Lock-free status state of one backend server.
#[derive(Debug, Default)]
pub struct StatusState {
    bits: AtomicU64,
    /// Set once a failure of the current master has been logged.
    master_err_is_logged: AtomicBool,
}

impl StatusState {
    pub fn new(initial: StatusBits) -> Self {
        Self {
            bits: AtomicU64::new(initial.raw()),
            master_err_is_logged: AtomicBool::new(false),
        }
    }

    /// Set `bits`, leaving all other bits untouched.
    ///
    /// Whenever the server is master after the update, the master error latch
    /// is reset. This happens on every call, not only when MASTER goes from
    /// unset to set.
    pub fn set(&self, bits: StatusBits) -> StatusBits {
        let now = StatusBits(self.bits.fetch_or(bits.raw(), Ordering::AcqRel) | bits.raw());
        if now.contains(StatusBits::MASTER) {
            self.master_err_is_logged.store(false, Ordering::Release);
        }
        now
    }

    /// Clear `bits`, leaving all other bits untouched.
    pub fn clear(&self, bits: StatusBits) -> StatusBits {
        StatusBits(self.bits.fetch_and(!bits.raw(), Ordering::AcqRel) & !bits.raw())
    }

    /// Replace the whole set.
    pub fn assign(&self, bits: StatusBits) {
        self.bits.store(bits.raw(), Ordering::Release);
    }

    /// True when all of `bits` are set. The empty set is never "had".
    pub fn has(&self, bits: StatusBits) -> bool {
        !bits.is_empty() && self.snapshot().contains(bits)
    }

    pub fn snapshot(&self) -> StatusBits {
        StatusBits(self.bits.load(Ordering::Acquire))
    }

    pub fn as_string(&self) -> String {
        status_to_string(self.snapshot())
    }

    /// Record a master failure. Returns `true` only for the first failure
    /// since the latch was last reset, so the caller logs it once.
    pub fn note_master_error(&self) -> bool {
        !self.master_err_is_logged.swap(true, Ordering::AcqRel)
    }

    pub fn master_error_logged(&self) -> bool {
        self.master_err_is_logged.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.has(StatusBits::RUNNING)
    }

    pub fn is_down(&self) -> bool {
        !self.is_running()
    }

    pub fn is_master(&self) -> bool {
        self.has(StatusBits::MASTER)
    }

    pub fn is_slave(&self) -> bool {
        self.has(StatusBits::SLAVE)
    }

    pub fn is_in_maint(&self) -> bool {
        self.has(StatusBits::MAINTENANCE)
    }

    pub fn is_draining(&self) -> bool {
        self.has(StatusBits::DRAINING)
    }

    /// Running and not in maintenance.
    pub fn is_usable(&self) -> bool {
        let bits = self.snapshot();
        bits.contains(StatusBits::RUNNING) && !bits.contains(StatusBits::MAINTENANCE)
    }
}
