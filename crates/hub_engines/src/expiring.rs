#![forbid(unsafe_code)]

use hub_kernel_contracts::MonotonicTimeNs;

/// A value that stops being visible once `expires_at` is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiringNotice<T> {
    value: T,
    expires_at: MonotonicTimeNs,
}

impl<T> ExpiringNotice<T> {
    pub fn new(value: T, now: MonotonicTimeNs, ttl_ms: u64) -> Self {
        Self {
            value,
            expires_at: now.saturating_add_ms(ttl_ms),
        }
    }

    pub fn expires_at(&self) -> MonotonicTimeNs {
        self.expires_at
    }

    pub fn is_expired(&self, now: MonotonicTimeNs) -> bool {
        now >= self.expires_at
    }

    pub fn get(&self, now: MonotonicTimeNs) -> Option<&T> {
        if self.is_expired(now) {
            None
        } else {
            Some(&self.value)
        }
    }
}

/// Holds at most one notice; a newer one replaces the old.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeSlot<T> {
    ttl_ms: u64,
    notice: Option<ExpiringNotice<T>>,
}

impl<T> NoticeSlot<T> {
    pub fn new(ttl_ms: u64) -> Self {
        Self { ttl_ms, notice: None }
    }

    pub fn raise(&mut self, value: T, now: MonotonicTimeNs) {
        self.notice = Some(ExpiringNotice::new(value, now, self.ttl_ms));
    }

    pub fn current(&self, now: MonotonicTimeNs) -> Option<&T> {
        self.notice.as_ref().and_then(|n| n.get(now))
    }

    /// Drops the notice once it has expired. Returns true if something was dropped.
    pub fn reap(&mut self, now: MonotonicTimeNs) -> bool {
        if self.notice.as_ref().is_some_and(|n| n.is_expired(now)) {
            self.notice = None;
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.notice = None;
    }
}
