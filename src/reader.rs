use std::{
    io::Read,
    process::Child,
    sync::{Arc, Mutex, mpsc},
};

/// One observation published by the streaming reader.
#[derive(Debug)]
pub enum OutputEvent {
    /// A chunk of merged stdout+stderr text, in emission order.
    Chunk(String),
    /// End of stream: the process was reaped and exited with this code
    /// (`None` when killed by a signal).
    Exited(Option<i32>),
}

/// Drain `output` on a background thread, forwarding text chunks over `tx`.
///
/// Reads are buffered (4 KiB) rather than byte-at-a-time; partial lines are
/// forwarded as soon as they arrive, so the coordinator sees incremental
/// output without waiting for newlines. After end-of-stream the child is
/// taken from the shared slot, reaped, and its exit code published.
///
/// Send failures are ignored: a dropped receiver means the job was cancelled
/// or replaced, and the thread's only remaining duty is reaping the child.
pub fn spawn_reader(
    mut output: impl Read + Send + 'static,
    child: Arc<Mutex<Option<Child>>>,
    tx: mpsc::Sender<OutputEvent>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            match output.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    if let Some(text) = take_utf8(&mut pending) {
                        let _ = tx.send(OutputEvent::Chunk(text));
                    }
                }
            }
        }

        if !pending.is_empty() {
            let _ = tx.send(OutputEvent::Chunk(
                String::from_utf8_lossy(&pending).into_owned(),
            ));
        }

        let reaped = child.lock().ok().and_then(|mut slot| slot.take());
        let code = match reaped {
            Some(mut child) => child.wait().ok().and_then(|status| status.code()),
            // Already reaped by cancel(); nobody is listening anymore.
            None => None,
        };
        let _ = tx.send(OutputEvent::Exited(code));
    })
}

/// Split the longest valid UTF-8 prefix out of `pending`, leaving at most an
/// incomplete trailing sequence behind. Genuinely invalid bytes are replaced
/// rather than held forever.
fn take_utf8(pending: &mut Vec<u8>) -> Option<String> {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            if s.is_empty() {
                return None;
            }
            let text = s.to_string();
            pending.clear();
            Some(text)
        }
        Err(e) => {
            let valid = e.valid_up_to();
            match e.error_len() {
                // Truncated multi-byte sequence at the tail: emit the valid
                // prefix and wait for the rest.
                None => {
                    if valid == 0 {
                        return None;
                    }
                    let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
                    pending.drain(..valid);
                    Some(text)
                }
                // Invalid bytes mid-stream: substitute and move on.
                Some(bad) => {
                    let mut text = String::from_utf8_lossy(&pending[..valid]).into_owned();
                    text.push('\u{FFFD}');
                    pending.drain(..valid + bad);
                    let rest = take_utf8(pending);
                    if let Some(rest) = rest {
                        text.push_str(&rest);
                    }
                    Some(text)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_utf8_holds_back_truncated_sequences() {
        // "é" is 0xC3 0xA9; split it across reads.
        let mut pending = b"ab\xC3".to_vec();
        assert_eq!(take_utf8(&mut pending).as_deref(), Some("ab"));
        assert_eq!(pending, vec![0xC3]);

        pending.push(0xA9);
        assert_eq!(take_utf8(&mut pending).as_deref(), Some("é"));
        assert!(pending.is_empty());
    }

    #[test]
    fn take_utf8_replaces_invalid_bytes() {
        let mut pending = b"a\xFFb".to_vec();
        let text = take_utf8(&mut pending).unwrap();
        assert_eq!(text, "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[test]
    fn take_utf8_empty_input_yields_nothing() {
        let mut pending = Vec::new();
        assert!(take_utf8(&mut pending).is_none());
    }
}
