use tracing::{debug, trace};

/// Longest line kept while waiting for a terminator; longer runs are noise
pub const MAX_LINE_BYTES: usize = 256;

/// Splits a raw byte stream into text lines.
///
/// Lines end at `\n` or `\r`; empty lines are skipped. Bytes after the last
/// terminator are carried into the next [`push`](LineAssembler::push). Invalid
/// UTF-8 is replaced rather than rejected so one bad byte cannot stall the
/// stream.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            match byte {
                b'\n' | b'\r' => {
                    if !self.pending.is_empty() {
                        lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                        self.pending.clear();
                    }
                }
                _ => {
                    if self.pending.len() >= MAX_LINE_BYTES {
                        debug!(
                            "Discarding {} unterminated bytes from serial stream",
                            self.pending.len()
                        );
                        trace!("Discarded bytes: {}", hex::encode(&self.pending));
                        self.pending.clear();
                    }
                    self.pending.push(byte);
                }
            }
        }

        lines
    }

    /// Bytes buffered since the last terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
