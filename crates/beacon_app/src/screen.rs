use std::sync::{Arc, Mutex, PoisonError};

use beacon_core::Notice;
use beacon_engine::MonitorSink;

/// Where views print. Tests capture lines instead of writing to stdout.
#[derive(Debug, Clone, Default)]
pub struct Screen {
    captured: Option<Arc<Mutex<Vec<String>>>>,
}

impl Screen {
    pub fn stdout() -> Self {
        Self { captured: None }
    }

    #[cfg(test)]
    pub fn captured() -> Self {
        Self {
            captured: Some(Arc::default()),
        }
    }

    pub fn line(&self, text: impl AsRef<str>) {
        match &self.captured {
            Some(lines) => lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text.as_ref().to_string()),
            None => println!("{}", text.as_ref()),
        }
    }

    #[cfg(test)]
    pub fn lines(&self) -> Vec<String> {
        self.captured
            .as_ref()
            .map(|lines| lines.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }
}

/// Prints connection notices; this is the "disconnected" indicator.
pub struct ScreenSink {
    screen: Screen,
}

impl ScreenSink {
    pub fn new(screen: Screen) -> Self {
        Self { screen }
    }
}

impl MonitorSink for ScreenSink {
    fn emit(&self, notice: Notice) {
        match notice {
            Notice::Connected { title } => self
                .screen
                .line(format!("== connected to {}", title.as_deref().unwrap_or("server"))),
            Notice::Disconnected { retry_in } => self.screen.line(format!(
                "== disconnected, retrying in {:.1}s",
                retry_in.as_secs_f64()
            )),
            Notice::RouteEntered(route) => self.screen.line(format!("== {}", route.path())),
        }
    }
}
