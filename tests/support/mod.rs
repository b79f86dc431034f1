use download_list::host::StatusSink;
use std::sync::Mutex;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Status sink keeping every status message it was given
#[derive(Default)]
pub struct CapturingStatus {
    messages: Mutex<Vec<String>>,
}

impl CapturingStatus {
    pub fn last(&self) -> Option<String> {
        self.messages.lock().unwrap().last().cloned()
    }
}

impl StatusSink for CapturingStatus {
    fn set_status(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
