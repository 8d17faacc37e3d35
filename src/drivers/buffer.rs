use std::sync::Arc;
use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use serde::Serialize;
use crate::drivers::AcquisitionError;
/// One delivered unit of data: a time axis and the matching channels x samples matrix.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SampleBlock {
    time: Array1<f64>,
    data: Array2<f64>, // channels x samples
}
impl SampleBlock {
    /// Builds a block, rejecting mismatched sample counts and time vectors that go backwards.
    pub fn new(time: Array1<f64>, data: Array2<f64>) -> Result<Self, AcquisitionError> {
        if time.len() != data.ncols() {
            return Err(AcquisitionError::ShapeMismatch {
                time_len: time.len(),
                data_len: data.ncols(),
            });
        }
        if let Some(position) = time
            .iter()
            .zip(time.iter().skip(1))
            .position(|(prev, next)| next < prev)
        {
            return Err(AcquisitionError::NonMonotonicTime {
                position: position + 1,
            });
        }
        Ok(Self { time, data })
    }
    pub fn time(&self) -> &Array1<f64> {
        &self.time
    }
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }
    pub fn num_channels(&self) -> usize {
        self.data.nrows()
    }
    pub fn num_samples(&self) -> usize {
        self.time.len()
    }
    pub fn start_time(&self) -> Option<f64> {
        self.time.get(0).copied()
    }
    pub fn end_time(&self) -> Option<f64> {
        self.time
            .len()
            .checked_sub(1)
            .and_then(|last| self.time.get(last))
            .copied()
    }
    pub fn into_parts(self) -> (Array1<f64>, Array2<f64>) {
        (self.time, self.data)
    }
}
/// Append-only store of sample blocks in arrival order.
///
/// Blocks are shared behind `Arc` and never modified once appended, so cloning
/// the buffer is cheap and yields a consistent view of every block received so far.
/// [`TimestampedBuffer::copy`] additionally duplicates the sample data.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimestampedBuffer {
    blocks: Vec<Arc<SampleBlock>>,
}
impl TimestampedBuffer {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.blocks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
    pub fn add(&mut self, time: Array1<f64>, data: Array2<f64>) -> Result<(), AcquisitionError> {
        self.push(time, data).map(drop)
    }
    /// Appends a block and returns a shared handle to it.
    pub(crate) fn push(
        &mut self,
        time: Array1<f64>,
        data: Array2<f64>,
    ) -> Result<Arc<SampleBlock>, AcquisitionError> {
        let block = Arc::new(SampleBlock::new(time, data)?);
        self.blocks.push(Arc::clone(&block));
        Ok(block)
    }
    /// Owned copy of the block at `index`; negative indices count from the end.
    ///
    /// Returns `Ok(None)` when the buffer holds no blocks yet.
    pub fn sample_block(&self, index: isize) -> Result<Option<SampleBlock>, AcquisitionError> {
        Ok(self.sample_block_ref(index)?.cloned())
    }
    /// Same lookup as [`TimestampedBuffer::sample_block`] but borrows the stored block.
    pub fn sample_block_ref(&self, index: isize) -> Result<Option<&SampleBlock>, AcquisitionError> {
        if self.blocks.is_empty() {
            return Ok(None);
        }
        let position =
            normalize_index(index, self.blocks.len()).ok_or(AcquisitionError::IndexOutOfRange {
                index,
                len: self.blocks.len(),
            })?;
        Ok(Some(self.blocks[position].as_ref()))
    }
    /// Deep copy of every block, independent of later appends.
    pub fn copy(&self) -> TimestampedBuffer {
        TimestampedBuffer {
            blocks: self
                .blocks
                .iter()
                .map(|block| Arc::new(SampleBlock::clone(block)))
                .collect(),
        }
    }
    pub fn blocks(&self) -> &[Arc<SampleBlock>] {
        &self.blocks
    }
    pub fn iter(&self) -> impl Iterator<Item = &SampleBlock> {
        self.blocks.iter().map(|block| block.as_ref())
    }
    pub fn total_samples(&self) -> usize {
        self.iter().map(SampleBlock::num_samples).sum()
    }
    /// Time axis of all blocks laid end to end.
    pub fn time(&self) -> Array1<f64> {
        self.iter()
            .flat_map(|block| block.time.iter().copied())
            .collect()
    }
    /// Channels x samples matrix of all blocks laid end to end.
    pub fn data(&self) -> Result<Array2<f64>, AcquisitionError> {
        let Some(first) = self.blocks.first() else {
            return Ok(Array2::zeros((0, 0)));
        };
        let expected = first.num_channels();
        if let Some(block) = self.iter().find(|b| b.num_channels() != expected) {
            return Err(AcquisitionError::ChannelMismatch {
                expected,
                actual: block.num_channels(),
            });
        }
        let views: Vec<ArrayView2<f64>> = self.iter().map(|b| b.data.view()).collect();
        concatenate(Axis(1), &views).map_err(|err| AcquisitionError::Backend(err.into()))
    }
}
impl<'a> IntoIterator for &'a TimestampedBuffer {
    type Item = &'a SampleBlock;
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, Arc<SampleBlock>>,
        fn(&'a Arc<SampleBlock>) -> &'a SampleBlock,
    >;
    fn into_iter(self) -> Self::IntoIter {
        self.blocks
            .iter()
            .map(shared_block as fn(&'a Arc<SampleBlock>) -> &'a SampleBlock)
    }
}
fn shared_block(block: &Arc<SampleBlock>) -> &SampleBlock {
    block
}
fn normalize_index(index: isize, len: usize) -> Option<usize> {
    let len = isize::try_from(len).ok()?;
    let position = if index < 0 { len + index } else { index };
    (0..len).contains(&position).then_some(position as usize)
}
