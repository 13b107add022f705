//! Duplicate suppression for outbound messages.

/// Remembers the last accepted payload and rejects exact repeats.
///
/// There is a single slot for the whole stream, not one per face: in a
/// multi-face scene every candidate is compared against whichever message was
/// accepted last. Comparison is on serialized bytes only, so records that
/// serialize identically count as duplicates.
#[derive(Debug, Default, Clone)]
pub struct ChangeFilter {
    last_sent: Option<Vec<u8>>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `candidate` should be transmitted.
    ///
    /// Accepting a candidate replaces the snapshot immediately, whether or not
    /// the transport manages to deliver it afterwards.
    pub fn should_send(&mut self, candidate: &[u8]) -> bool {
        if self.last_sent.as_deref() == Some(candidate) {
            return false;
        }
        self.last_sent = Some(candidate.to_vec());
        true
    }

    /// The last accepted payload, if any.
    pub fn last_sent(&self) -> Option<&[u8]> {
        self.last_sent.as_deref()
    }
}
