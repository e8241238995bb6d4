//! Latest-value index: the most recent sample seen per channel id.

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::types::ChannelSample;

/// Read-only view of the index handed to [`LatestValueIndex::update_then`]
/// and [`LatestValueIndex::replace_then`].
pub struct IndexView<'a> {
    entries: &'a HashMap<String, ChannelSample>,
}

impl IndexView<'_> {
    #[must_use]
    pub fn get(&self, channel_id: &str) -> Option<&ChannelSample> {
        self.entries.get(channel_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map from channel id to the last sample received for it.
///
/// Samples are applied in the order given; a later sample for the same id
/// replaces an earlier one. All access goes through one lock, so a caller
/// of [`update_then`](Self::update_then) never observes a half-applied batch.
#[derive(Debug, Default)]
pub struct LatestValueIndex {
    entries: Mutex<HashMap<String, ChannelSample>>,
}

impl LatestValueIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of samples in order.
    pub fn update<I>(&self, samples: I)
    where
        I: IntoIterator<Item = ChannelSample>,
    {
        let mut entries = self.entries.lock();
        apply(&mut entries, samples);
    }

    /// Apply a batch, then run `f` against the updated index under the same lock.
    pub fn update_then<I, F, T>(&self, samples: I, f: F) -> T
    where
        I: IntoIterator<Item = ChannelSample>,
        F: FnOnce(&IndexView<'_>) -> T,
    {
        let mut entries = self.entries.lock();
        apply(&mut entries, samples);
        f(&IndexView { entries: &entries })
    }

    /// Rebuild the index from one response, then run `f` against it under the
    /// same lock. Samples from earlier batches are gone before `f` runs.
    pub fn replace_then<I, F, T>(&self, samples: I, f: F) -> T
    where
        I: IntoIterator<Item = ChannelSample>,
        F: FnOnce(&IndexView<'_>) -> T,
    {
        let mut entries = self.entries.lock();
        entries.clear();
        apply(&mut entries, samples);
        f(&IndexView { entries: &entries })
    }

    /// Clone of the latest sample for `channel_id`.
    #[must_use]
    pub fn get(&self, channel_id: &str) -> Option<ChannelSample> {
        self.entries.lock().get(channel_id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn apply<I>(entries: &mut HashMap<String, ChannelSample>, samples: I)
where
    I: IntoIterator<Item = ChannelSample>,
{
    for sample in samples {
        entries.insert(sample.channel_id.clone(), sample);
    }
}
