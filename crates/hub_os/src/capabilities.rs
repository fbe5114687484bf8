#![forbid(unsafe_code)]

use std::collections::VecDeque;

use hub_kernel_contracts::ph1route::GeoPoint;

/// Source of the device position. `None` means no fix, which is a normal state.
pub trait LocationProvider {
    fn current_location(&self) -> Option<GeoPoint>;
}

/// Source of decoded box codes.
pub trait Scanner {
    fn next_code(&mut self) -> Option<String>;
}

/// A location provider pinned to one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FixedLocation {
    location: Option<GeoPoint>,
}

impl FixedLocation {
    pub fn new(location: Option<GeoPoint>) -> Self {
        Self { location }
    }

    pub fn no_fix() -> Self {
        Self { location: None }
    }

    pub fn set(&mut self, location: Option<GeoPoint>) {
        self.location = location;
    }
}

impl LocationProvider for FixedLocation {
    fn current_location(&self) -> Option<GeoPoint> {
        self.location
    }
}

/// Hands out queued codes in order, standing in for a camera plus QR decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedScanner {
    queue: VecDeque<String>,
}

impl SimulatedScanner {
    pub fn new<I, C>(codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self {
            queue: codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, code: impl Into<String>) {
        self.queue.push_back(code.into());
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl Scanner for SimulatedScanner {
    fn next_code(&mut self) -> Option<String> {
        self.queue.pop_front()
    }
}
