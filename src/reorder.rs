use crate::segment::Segment;

#[derive(Debug, Default)]
pub struct ReorderBuffer {
    segments: Vec<Segment>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        ReorderBuffer::default()
    }

    // false (and segment dropped) if an entry with the same seqno is already buffered
    pub fn insert(&mut self, segment: Segment) -> bool {
        match self
            .segments
            .binary_search_by_key(&segment.seqno, |s| s.seqno)
        {
            Ok(_) => false,
            Err(pos) => {
                self.segments.insert(pos, segment);
                true
            }
        }
    }

    pub fn front(&self) -> Option<&Segment> {
        self.segments.first()
    }

    pub fn pop_front(&mut self) -> Option<Segment> {
        if self.segments.is_empty() {
            None
        } else {
            Some(self.segments.remove(0))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
}
