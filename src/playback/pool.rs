use crate::blendshape::Weights;
use crate::events::AvatarStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct BlendshapeResult {
    pub weights: Weights,
    pub status: AvatarStatus,
    pub end_of_speech: bool,
}

impl Default for BlendshapeResult {
    fn default() -> Self {
        Self {
            weights: Weights::NEUTRAL,
            status: AvatarStatus::Listening,
            end_of_speech: false,
        }
    }
}

/// Ownership of one pool record. Not `Clone`: a record has exactly one holder
/// and goes back to the pool by value through [`FramePool::release`].
#[derive(Debug)]
pub struct PoolSlot(usize);

pub struct FramePool {
    records: Vec<BlendshapeResult>,
    free: Vec<usize>,
}

impl FramePool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: vec![BlendshapeResult::default(); capacity],
            free: (0..capacity).rev().collect(),
        }
    }

    /// Hands out a reset record, growing the arena only when every record is taken.
    pub fn acquire(&mut self) -> PoolSlot {
        match self.free.pop() {
            Some(i) => {
                self.records[i] = BlendshapeResult::default();
                PoolSlot(i)
            }
            None => {
                self.records.push(BlendshapeResult::default());
                PoolSlot(self.records.len() - 1)
            }
        }
    }

    pub fn release(&mut self, slot: PoolSlot) {
        self.free.push(slot.0);
    }

    pub fn get(&self, slot: &PoolSlot) -> &BlendshapeResult {
        &self.records[slot.0]
    }

    pub fn get_mut(&mut self, slot: &PoolSlot) -> &mut BlendshapeResult {
        &mut self.records[slot.0]
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn allocated(&self) -> usize {
        self.records.len()
    }
}
