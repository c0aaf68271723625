use std::cell::Cell;
use std::rc::Rc;

use crate::envelope::Status;

/// Server clock minus local clock, in seconds.
///
/// One value per process: clones share it, so views read the skew the
/// navigator last computed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockSkew(Rc<Cell<i64>>);

impl ClockSkew {
    pub fn get(&self) -> i64 {
        self.0.get()
    }

    /// Local time corrected to the server's clock.
    pub fn server_now(&self, local_unix: i64) -> i64 {
        local_unix + self.get()
    }

    fn set(&self, skew: i64) {
        self.0.set(skew);
    }
}

/// Server-wide state shared by every page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dashboard {
    pub title: Option<String>,
    pub version: Option<String>,
    pub clock_skew: ClockSkew,
    pub connected: bool,
}

impl Dashboard {
    pub fn apply_status(&mut self, status: &Status, local_unix: i64) {
        if let Some(title) = &status.title {
            self.title = Some(title.clone());
        }
        if let Some(version) = &status.version {
            self.version = Some(version.clone());
        }
        if let Some(server_time) = status.server_time {
            self.clock_skew.set(server_time - local_unix);
        }
        self.connected = true;
    }

    pub fn server_now(&self, local_unix: i64) -> i64 {
        self.clock_skew.server_now(local_unix)
    }
}
