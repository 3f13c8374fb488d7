use std::collections::VecDeque;

use signal_channel::IceCandidate;

/// Remote candidates received before a remote description exists, kept in
/// arrival order.
#[derive(Debug, Default, Clone)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Empties the buffer, returning every candidate oldest first.
    pub fn drain_in_order(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_arrival_order_exactly_once() {
        let mut buffer = CandidateBuffer::new();
        for n in 0..3 {
            buffer.append(IceCandidate::new(format!("candidate:{n}")));
        }
        assert_eq!(buffer.len(), 3);

        let drained: Vec<String> = buffer
            .drain_in_order()
            .into_iter()
            .map(|candidate| candidate.candidate)
            .collect();
        assert_eq!(drained, ["candidate:0", "candidate:1", "candidate:2"]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_in_order().is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let mut buffer = CandidateBuffer::new();
        buffer.append(IceCandidate::new("candidate:x"));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
