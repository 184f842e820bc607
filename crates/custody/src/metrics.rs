use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Node-level prometheus metrics.
pub struct CustodyMetrics {
    /// Number of live session records on this node.
    pub sessions: IntGauge,
    /// Number of occupied pending slots.
    pub pending_slots: IntGauge,
    /// Number of in-flight fetch tasks.
    pub active_fetches: IntGauge,
    /// Total states forwarded to peers in answer to data requests.
    pub states_forwarded: IntCounter,
    /// Total successful disconnect saves.
    pub saves: IntCounter,
    /// Total failed disconnect saves.
    pub save_failures: IntCounter,
}

impl CustodyMetrics {
    /// Create metrics and register them with the given prometheus registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sessions = IntGauge::with_opts(Opts::new(
            "custody_sessions",
            "Number of live session records on this node",
        ))?;
        let pending_slots = IntGauge::with_opts(Opts::new(
            "custody_pending_slots",
            "Number of occupied pending slots",
        ))?;
        let active_fetches = IntGauge::with_opts(Opts::new(
            "custody_active_fetches",
            "Number of in-flight fetch tasks",
        ))?;
        let states_forwarded = IntCounter::with_opts(Opts::new(
            "custody_states_forwarded_total",
            "States forwarded to peers in answer to data requests",
        ))?;
        let saves = IntCounter::with_opts(Opts::new(
            "custody_saves_total",
            "Successful disconnect saves",
        ))?;
        let save_failures = IntCounter::with_opts(Opts::new(
            "custody_save_failures_total",
            "Failed disconnect saves",
        ))?;

        registry.register(Box::new(sessions.clone()))?;
        registry.register(Box::new(pending_slots.clone()))?;
        registry.register(Box::new(active_fetches.clone()))?;
        registry.register(Box::new(states_forwarded.clone()))?;
        registry.register(Box::new(saves.clone()))?;
        registry.register(Box::new(save_failures.clone()))?;

        Ok(Self {
            sessions,
            pending_slots,
            active_fetches,
            states_forwarded,
            saves,
            save_failures,
        })
    }

    /// Create metrics without registering (for testing).
    pub fn unregistered() -> Self {
        Self {
            sessions: IntGauge::new("custody_sessions", "sessions").expect("valid metric name"),
            pending_slots: IntGauge::new("custody_pending_slots", "pending")
                .expect("valid metric name"),
            active_fetches: IntGauge::new("custody_active_fetches", "fetches")
                .expect("valid metric name"),
            states_forwarded: IntCounter::new("custody_states_forwarded_total", "forwarded")
                .expect("valid metric name"),
            saves: IntCounter::new("custody_saves_total", "saves").expect("valid metric name"),
            save_failures: IntCounter::new("custody_save_failures_total", "save failures")
                .expect("valid metric name"),
        }
    }
}
