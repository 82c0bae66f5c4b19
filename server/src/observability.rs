use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-wide gateway counters, shared by every socket.
#[derive(Default)]
pub struct SocketMetrics {
    connections: AtomicUsize,
    ops_relayed: AtomicUsize,
    signals_relayed: AtomicUsize,
    nacks: AtomicUsize,
}

impl SocketMetrics {
    pub fn inc_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_connections(&self) {
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                Some(count.saturating_sub(1))
            });
    }

    pub fn add_ops(&self, count: usize) {
        self.ops_relayed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_signals(&self, count: usize) {
        self.signals_relayed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_nacks(&self) {
        self.nacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn ops_relayed(&self) -> usize {
        self.ops_relayed.load(Ordering::Relaxed)
    }

    pub fn signals_relayed(&self) -> usize {
        self.signals_relayed.load(Ordering::Relaxed)
    }

    pub fn nacks(&self) -> usize {
        self.nacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_activity() {
        let metrics = SocketMetrics::default();
        metrics.inc_connections();
        metrics.inc_connections();
        metrics.dec_connections();
        metrics.add_ops(3);
        metrics.add_signals(2);
        metrics.inc_nacks();

        assert_eq!(metrics.connections(), 1);
        assert_eq!(metrics.ops_relayed(), 3);
        assert_eq!(metrics.signals_relayed(), 2);
        assert_eq!(metrics.nacks(), 1);
    }

    #[test]
    fn connection_count_never_underflows() {
        let metrics = SocketMetrics::default();
        metrics.dec_connections();
        assert_eq!(metrics.connections(), 0);
    }
}
