use anyhow::Result;

use super::Transport;

/// `log://` transport: nothing leaves the process, every event is logged instead.
#[derive(Debug, Default)]
pub struct LogTransport {
    emitted: u64,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    fn emit(&mut self, event: &str, payload: &serde_json::Value) -> Result<()> {
        self.emitted += 1;
        match payload.get("image").and_then(|v| v.as_str()) {
            // preview frames are too large to log verbatim
            Some(image) => log::info!("[dry-run] {} ({} base64 bytes)", event, image.len()),
            None => log::info!("[dry-run] {} {}", event, payload),
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        log::info!("[dry-run] disconnected after {} events", self.emitted);
        Ok(())
    }
}
