use ratchet::control::ControlState;
use ratchet::error::SqlError;
use ratchet::listener::ProgressListener;
use ratchet::source::Command;
use ratchet::upgrade::PatchSegment;
use ratchet::{Interrupt, Ratchet};
use ratchet_core::testing::MemoryExecutor;

use std::sync::{Arc, Mutex};

pub const SHOP: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/upgrade/patches/shop.sql");

/// Open the shop patch file against `executor`.
pub fn shop(executor: &MemoryExecutor) -> Ratchet<MemoryExecutor> {
    let _ = env_logger::builder().is_test(true).try_init();
    Ratchet::open(SHOP, executor.clone()).unwrap()
}

/// Records what a run reports, and optionally interrupts it once after a
/// command containing some fragment was executed.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
    stop: Arc<Mutex<Option<(String, Interrupt)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt_after(self, fragment: &str, interrupt: Interrupt) -> Self {
        *self.stop.lock().unwrap() = Some((fragment.to_string(), interrupt));
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Only the counter updates, as `"<in flight> <statements>"`.
    pub fn progress(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("progress ").map(str::to_string))
            .collect()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ProgressListener for Recorder {
    fn segment_starting(&self, segment: &PatchSegment, resume_from: i64) {
        self.push(format!("segment {} from {resume_from}", segment.target()));
    }

    fn section(&self, level: u8, message: &str) {
        self.push(format!("section {level} {message}"));
    }

    fn executed(&self, command: &Command) {
        self.push(format!("executed {}", command.text().trim()));
        let mut stop = self.stop.lock().unwrap();
        if stop.as_ref().is_some_and(|(f, _)| command.text().contains(f.as_str())) {
            if let Some((_, interrupt)) = stop.take() {
                interrupt.interrupt();
            }
        }
    }

    fn suppressed(&self, _: &Command, error: &SqlError) {
        self.push(format!("suppressed {}", error.code().unwrap_or("-")));
    }

    fn progress(&self, state: &ControlState) {
        self.push(format!(
            "progress {} {}",
            state.in_flight().unwrap_or("-"),
            state.statements
        ));
    }

    fn no_upgrade_needed(&self, version: Option<&str>) {
        self.push(format!("no upgrade needed at {}", version.unwrap_or("-")));
    }

    fn upgrade_complete(&self, version: Option<&str>) {
        self.push(format!("complete at {}", version.unwrap_or("-")));
    }
}
