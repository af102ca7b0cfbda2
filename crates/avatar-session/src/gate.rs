/// Conjunctive readiness condition for a session.
///
/// Opens once the transport has signalled `Ready` and, when the backend
/// has a start call, that call has been acknowledged. The two signals may
/// arrive in either order. Without a start call the gate degenerates to
/// the transport signal alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    ack_required: bool,
    backend_ack: bool,
    transport_ready: bool,
}

impl ReadinessGate {
    pub fn new(ack_required: bool) -> Self {
        Self {
            ack_required,
            backend_ack: false,
            transport_ready: false,
        }
    }

    pub fn acknowledge(&mut self) {
        self.backend_ack = true;
    }

    pub fn mark_transport_ready(&mut self) {
        self.transport_ready = true;
    }

    pub fn has_backend_ack(&self) -> bool {
        self.backend_ack || !self.ack_required
    }

    /// Whether a start call was actually acknowledged, as opposed to not
    /// being required.
    pub fn backend_acknowledged(&self) -> bool {
        self.ack_required && self.backend_ack
    }

    pub fn is_open(&self) -> bool {
        self.transport_ready && self.has_backend_ack()
    }

    /// Names the signals still outstanding, for diagnostics.
    pub fn missing(&self) -> &'static str {
        match (self.transport_ready, self.has_backend_ack()) {
            (true, true) => "nothing",
            (false, true) => "transport ready signal",
            (true, false) => "backend start acknowledgment",
            (false, false) => "transport ready signal and backend start acknowledgment",
        }
    }
}
