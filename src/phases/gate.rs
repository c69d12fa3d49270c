use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::debug;

/// Creates a closed one-shot gate. It opens when the [`GateOpener`] is opened or dropped.
pub fn gate(name: &'static str) -> (GateOpener, Gate) {
    let (signal, watch) = bounded::<()>(0);
    (
        GateOpener {
            name,
            _signal: signal,
        },
        Gate { name, watch },
    )
}

/// Nothing is ever sent on the channel; dropping the sender is the signal.
#[derive(Debug)]
pub struct GateOpener {
    name: &'static str,
    _signal: Sender<()>,
}

impl GateOpener {
    pub fn open(self) {
        debug!(gate = self.name, "gate opened");
    }
}

#[derive(Debug, Clone)]
pub struct Gate {
    name: &'static str,
    watch: Receiver<()>,
}

impl Gate {
    pub fn is_open(&self) -> bool {
        matches!(self.watch.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the gate opens. Returns `false` when `timeout` elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => {
                let _ = self.watch.recv();
                true
            }
            Some(limit) => match self.watch.recv_timeout(limit) {
                Err(RecvTimeoutError::Timeout) => {
                    debug!(gate = self.name, ?limit, "gate still closed");
                    false
                }
                _ => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn starts_closed_and_opens_on_open() {
        let (opener, gate) = gate("fetch-client");
        assert!(!gate.is_open());
        opener.open();
        assert!(gate.is_open());
        assert!(gate.wait(Some(Duration::from_millis(1))));
    }

    #[test]
    fn dropping_the_opener_opens_the_gate() {
        let (opener, gate) = gate("sources");
        drop(opener);
        assert!(gate.wait(None));
    }

    #[test]
    fn wait_times_out_while_closed() {
        let (_opener, gate) = gate("fetch-client");
        let started = Instant::now();
        assert!(!gate.wait(Some(Duration::from_millis(30))));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn waiters_wake_when_opened_from_another_thread() {
        let (opener, gate) = gate("sources");
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.wait(Some(Duration::from_secs(5))))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        opener.open();
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }
}
