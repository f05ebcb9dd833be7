use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Instant,
};

use triple_buffer::{Input, Output, TripleBuffer};

use crate::FeatureSnapshot;

/// Creates the single-slot channel between the capture callback and the
/// render loop. The reader starts out seeing `initial`.
pub fn feature_channel(initial: FeatureSnapshot) -> (FeatureWriter, FeatureReader) {
    let (input, output) = TripleBuffer::new(&initial).split();
    (FeatureWriter { input }, FeatureReader { output })
}

/// Capture side of the channel. Publishing never blocks and never
/// allocates; a newer snapshot overwrites an unread one.
pub struct FeatureWriter {
    input: Input<FeatureSnapshot>,
}

impl FeatureWriter {
    pub fn publish(&mut self, snapshot: FeatureSnapshot) {
        self.input.write(snapshot);
    }
}

impl fmt::Debug for FeatureWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureWriter").finish_non_exhaustive()
    }
}

/// Render side of the channel. Always yields the most recent complete
/// snapshot.
pub struct FeatureReader {
    output: Output<FeatureSnapshot>,
}

impl FeatureReader {
    pub fn latest(&mut self) -> FeatureSnapshot {
        *self.output.read()
    }

    /// `true` when a snapshot has been published since the last read.
    pub fn has_update(&self) -> bool {
        self.output.updated()
    }

    /// Converts into a cloneable reader for several consumers.
    pub fn shared(self) -> SharedFeatureReader {
        SharedFeatureReader {
            output: Arc::new(Mutex::new(self.output)),
        }
    }
}

impl fmt::Debug for FeatureReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureReader").finish_non_exhaustive()
    }
}

/// Cloneable reader. The mutex is only shared among readers; the writer
/// never touches it.
#[derive(Clone)]
pub struct SharedFeatureReader {
    output: Arc<Mutex<Output<FeatureSnapshot>>>,
}

impl SharedFeatureReader {
    /// Latest snapshot, or `None` when another reader holds the lock.
    pub fn try_latest(&self) -> Option<FeatureSnapshot> {
        self.output.try_lock().ok().map(|mut output| *output.read())
    }

    /// Latest snapshot, falling back to silence stamped `now`.
    pub fn latest_or_silence(&self, now: Instant) -> FeatureSnapshot {
        self.try_latest().unwrap_or_else(|| FeatureSnapshot::silent(now))
    }
}

impl fmt::Debug for SharedFeatureReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFeatureReader").finish_non_exhaustive()
    }
}
